use crate::naming::AbbreviationCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One flattened row. Keys are kept in sorted order, so serialized records
/// are byte-stable.
pub type FlatRecord = Map<String, Value>;

/// A named sequence of flat records - one table in the output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name, e.g. "orders" or "orders_items"
    pub name: String,

    /// Rows in production order
    pub records: Vec<FlatRecord>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: FlatRecord) {
        self.records.push(record);
    }

    /// Rough number of bytes held by this table's records
    pub fn estimated_size(&self) -> usize {
        self.records.iter().map(estimate_record_size).sum()
    }
}

/// The main table plus every child table produced from it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSet {
    pub main: Table,

    /// Child tables keyed by name
    pub children: BTreeMap<String, Table>,

    /// Abbreviated names generated while building these tables
    #[serde(default, skip_serializing_if = "AbbreviationCache::is_empty")]
    pub abbreviations: AbbreviationCache,
}

impl TableSet {
    pub fn new(main_name: impl Into<String>) -> Self {
        TableSet {
            main: Table::new(main_name),
            children: BTreeMap::new(),
            abbreviations: AbbreviationCache::new(),
        }
    }

    /// Mutable access to a child table, creating it on first use
    pub fn child_mut(&mut self, name: &str) -> &mut Table {
        self.children
            .entry(name.to_string())
            .or_insert_with(|| Table::new(name))
    }

    pub fn child(&self, name: &str) -> Option<&Table> {
        self.children.get(name)
    }

    /// Append another set's rows after this set's rows, table by table
    pub fn append(&mut self, other: TableSet) {
        self.main.records.extend(other.main.records);
        for (name, table) in other.children {
            self.child_mut(&name).records.extend(table.records);
        }
        self.abbreviations.merge(other.abbreviations);
    }

    /// Move the buffered rows out, leaving empty tables with the same names
    pub fn take(&mut self) -> TableSet {
        let main_name = self.main.name.clone();
        std::mem::replace(self, TableSet::new(main_name))
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.children.values().all(Table::is_empty)
    }

    pub fn total_records(&self) -> usize {
        self.main.len() + self.children.values().map(Table::len).sum::<usize>()
    }

    pub fn estimated_size(&self) -> usize {
        self.main.estimated_size() + self.children.values().map(Table::estimated_size).sum::<usize>()
    }

    /// Every table, main first, children in name order
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        std::iter::once(&self.main).chain(self.children.values())
    }
}

fn estimate_record_size(record: &FlatRecord) -> usize {
    record
        .iter()
        .map(|(key, value)| key.len() + estimate_value_size(value))
        .sum()
}

fn estimate_value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 8,
        Value::Number(_) => 16,
        Value::String(s) => s.len() + 24,
        Value::Array(items) => 24 + items.iter().map(estimate_value_size).sum::<usize>(),
        Value::Object(map) => estimate_record_size(map) + 32,
    }
}
