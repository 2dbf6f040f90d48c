//! Funcbase admin CLI
//!
//! Usage: funcbase [--database PATH] <command>
//!
//! Results are printed to stdout as JSON. Failures print `{kind, message}`
//! to stderr.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Operation failed
//!   2 - Catalog and live schema disagree (`check`)

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use funcbase::ddl::CreateTableSpec;
use funcbase::function::parse_steps;
use funcbase::rows::RowQuery;
use funcbase::{Caller, Config, Error, Funcbase, Result};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage funcbase tables and functions")]
struct Cli {
    /// SQLite database file (in-memory when omitted)
    #[arg(long, global = true, env = "FUNCBASE_DATABASE")]
    database: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true, env = "FUNCBASE_CONFIG")]
    config: Option<PathBuf>,

    /// Reject unsupported field types instead of dropping them
    #[arg(long, global = true)]
    strict_field_types: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the system tables
    Init,
    /// Compare the catalog with the live schema
    Check,
    /// List user tables
    Tables {
        #[arg(long)]
        search: Option<String>,
    },
    /// Create a table from a JSON spec file
    CreateTable { spec: PathBuf },
    /// Show a table descriptor
    Describe {
        table: String,
        /// Descriptor attribute to include (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// List the live columns of a table
    Columns {
        table: String,
        /// Include the password column of auth tables
        #[arg(long)]
        include_auth: bool,
    },
    /// List the indexes of a table
    Indexes { table: String },
    RenameTable { old: String, new: String },
    DropTable { table: String },
    /// Drop indexes by name
    DropIndexes {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Read and write table rows
    #[command(subcommand)]
    Row(RowCommand),
    /// Manage stored functions
    #[command(subcommand)]
    Function(FunctionCommand),
}

#[derive(Subcommand)]
enum RowCommand {
    /// List rows, optionally filtered, sorted and paged
    List {
        table: String,
        /// Condition tree as JSON
        #[arg(long)]
        filter: Option<String>,
        /// Comma-separated columns, `-` prefix for descending
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 0)]
        page_size: u32,
    },
    Get { table: String, id: String },
    /// Insert a row from a JSON object of column values
    Insert { table: String, values: String },
    Update {
        table: String,
        id: String,
        values: String,
    },
    /// Delete rows by id
    Delete {
        table: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum FunctionCommand {
    /// Store a function from a JSON step list file
    Save { name: String, steps: PathBuf },
    List {
        #[arg(long)]
        search: Option<String>,
    },
    Show { name: String },
    Delete { name: String },
    /// Run a stored function
    Run {
        name: String,
        /// Caller input as a JSON object keyed by step name
        #[arg(long, default_value = "{}")]
        input: String,
        /// Caller id bound to `$user.id`
        #[arg(long)]
        user: Option<String>,
    },
}

/// Result of one command
struct Outcome {
    output: Value,
    exit_code: i32,
}

impl Outcome {
    fn ok(value: impl Serialize) -> Result<Self> {
        let output = serde_json::to_value(value)
            .map_err(|e| Error::validation(format!("unserialisable output: {e}")))?;
        Ok(Self {
            output,
            exit_code: 0,
        })
    }

    fn done() -> Result<Self> {
        Self::ok(serde_json::json!({"ok": true}))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(outcome) => {
            println!("{:#}", outcome.output);
            std::process::exit(outcome.exit_code);
        }
        Err(e) => {
            let report = serde_json::to_string(&e.report())
                .unwrap_or_else(|_| format!("{{\"message\": \"{e}\"}}"));
            eprintln!("{report}");
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut config = config.apply_env()?;
    if let Some(path) = &cli.database {
        config.database_path = Some(path.clone());
    }
    if cli.strict_field_types {
        config.strict_field_types = true;
    }
    Ok(config)
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::validation(format!("invalid JSON in {}: {e}", path.display())))
}

fn run(cli: Cli) -> Result<Outcome> {
    let config = load_config(&cli)?;
    let fb = Funcbase::open(&config)?;
    // Operator commands act with admin privilege
    let operator = Caller::admin("cli");

    match cli.command {
        Command::Init => Outcome::done(),
        Command::Check => {
            let report = fb.reconcile()?;
            let exit_code = if report.is_consistent() { 0 } else { 2 };
            let mut outcome = Outcome::ok(report)?;
            outcome.exit_code = exit_code;
            Ok(outcome)
        }
        Command::Tables { search } => Outcome::ok(fb.list_tables(search.as_deref())?),
        Command::CreateTable { spec } => {
            let spec: CreateTableSpec = serde_json::from_value(read_json(&spec)?)
                .map_err(|e| Error::validation(format!("malformed table spec: {e}")))?;
            fb.create_table(&spec)?;
            Outcome::done()
        }
        Command::Describe { table, fields } => {
            Outcome::ok(fb.describe_table(&table, fields.as_slice())?)
        }
        Command::Columns {
            table,
            include_auth,
        } => Outcome::ok(fb.list_columns(&table, include_auth, &operator)?.as_slice()),
        Command::Indexes { table } => Outcome::ok(fb.list_indexes(&table)?),
        Command::RenameTable { old, new } => {
            fb.rename_table(&old, &new)?;
            Outcome::done()
        }
        Command::DropTable { table } => {
            fb.drop_table(&table)?;
            Outcome::done()
        }
        Command::DropIndexes { names } => {
            fb.drop_indexes(names.as_slice())?;
            Outcome::done()
        }
        Command::Row(command) => run_row_command(&fb, command, &operator),
        Command::Function(command) => run_function_command(&fb, command),
    }
}

fn parse_object(what: &str, raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::validation(format!("{what} must be a JSON object: {e}")))
}

fn run_row_command(fb: &Funcbase, command: RowCommand, operator: &Caller) -> Result<Outcome> {
    match command {
        RowCommand::List {
            table,
            filter,
            sort,
            page,
            page_size,
        } => {
            let filter = match filter {
                Some(raw) => Value::Object(parse_object("--filter", &raw)?),
                None => Value::Null,
            };
            let query = RowQuery {
                filter,
                sort,
                page,
                page_size,
            };
            Outcome::ok(fb.fetch_rows(&table, &query, operator)?)
        }
        RowCommand::Get { table, id } => Outcome::ok(fb.fetch_row(&table, &id)?),
        RowCommand::Insert { table, values } => {
            let id = fb.insert_row(&table, &parse_object("values", &values)?, operator)?;
            Outcome::ok(serde_json::json!({ "id": id }))
        }
        RowCommand::Update { table, id, values } => {
            let found = fb.update_row(&table, &id, &parse_object("values", &values)?, operator)?;
            Outcome::ok(serde_json::json!({ "found": found }))
        }
        RowCommand::Delete { table, ids } => {
            let deleted = fb.delete_rows(&table, ids.as_slice())?;
            Outcome::ok(serde_json::json!({ "deleted": deleted }))
        }
    }
}

fn run_function_command(fb: &Funcbase, command: FunctionCommand) -> Result<Outcome> {
    match command {
        FunctionCommand::Save { name, steps } => {
            let steps = parse_steps(&read_json(&steps)?)?;
            fb.save_function(&name, &steps)?;
            Outcome::done()
        }
        FunctionCommand::List { search } => Outcome::ok(fb.list_functions(search.as_deref())?),
        FunctionCommand::Show { name } => Outcome::ok(fb.get_function(&name)?),
        FunctionCommand::Delete { name } => {
            fb.delete_function(&name)?;
            Outcome::done()
        }
        FunctionCommand::Run { name, input, user } => {
            let input = parse_object("--input", &input)?;
            let caller = user.map(Caller::user).unwrap_or_else(Caller::anonymous);
            Outcome::ok(fb.run_stored(&name, &input, &caller)?)
        }
    }
}
