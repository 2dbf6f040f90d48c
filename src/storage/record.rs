//! Record type - a row of named datums

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::datum::Datum;

/// A result row: column names paired with their values, in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Datum)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Record { fields: Vec::new() }
    }

    /// Get the number of columns in this record
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get a datum by column name
    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Get a datum by position
    pub fn get_index(&self, index: usize) -> Option<&Datum> {
        self.fields.get(index).map(|(_, d)| d)
    }

    /// Append a column, replacing any existing value with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: Datum) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Column names in order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate over (name, datum) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Datum)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), d))
    }
}

impl From<Vec<(String, Datum)>> for Record {
    fn from(fields: Vec<(String, Datum)>) -> Self {
        Record { fields }
    }
}

impl IntoIterator for Record {
    type Item = (String, Datum);
    type IntoIter = std::vec::IntoIter<(String, Datum)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
