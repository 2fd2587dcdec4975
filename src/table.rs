//! Row-oriented table handed back by every data-producing call.

use serde_json::{Map, Number, Value};

use crate::error::Result;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of column `name`, top to bottom. Missing cells read as null.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&NULL))
                .collect(),
        )
    }

    /// Appends a row; short rows are padded with nulls, long ones truncated.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Pads short rows with nulls and truncates long ones so that every row
    /// has one cell per column.
    pub fn normalize_rows(&mut self) {
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, Value::Null);
        }
    }

    /// Adds a column holding `value` on every row.
    pub fn insert_column(&mut self, name: impl Into<String>, value: Value) {
        self.normalize_rows();
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    /// Removes the named columns; unknown names are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        self.normalize_rows();
        retain_flagged(&mut self.columns, &keep);
        for row in &mut self.rows {
            retain_flagged(row, &keep);
        }
    }

    /// Stacks tables vertically. Columns are aligned by name, in first-seen
    /// order; cells a table does not have are null.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let tables: Vec<Table> = tables.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for t in &tables {
            for c in &t.columns {
                if !columns.contains(c) {
                    columns.push(c.clone());
                }
            }
        }

        let mut out = Table::new(columns);
        for t in tables {
            let mapping: Vec<Option<usize>> = out
                .columns
                .iter()
                .map(|c| t.column_index(c))
                .collect();
            for row in t.rows {
                out.rows.push(
                    mapping
                        .iter()
                        .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
        out
    }

    /// Parses delimited text with a header line.
    ///
    /// Numbers written with a decimal comma (`12,5`) become numbers, empty
    /// cells become null and everything else stays a string.
    pub fn from_csv(text: &str, delimiter: u8) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());

        let columns = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut table = Table::new(columns);
        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(parse_cell).collect());
        }
        Ok(table)
    }

    /// Builds a table out of JSON objects, nested objects being flattened into
    /// dotted column names (`timelaps.domain_ids`).
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Value>) -> Table {
        let flat: Vec<Map<String, Value>> = records
            .into_iter()
            .map(|r| {
                let mut out = Map::new();
                flatten_into("", r, &mut out);
                out
            })
            .collect();

        let mut columns: Vec<String> = Vec::new();
        for obj in &flat {
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut table = Table::new(columns);
        for obj in flat {
            let row = table
                .columns
                .iter()
                .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            table.rows.push(row);
        }
        table
    }
}

fn retain_flagged<T>(cells: &mut Vec<T>, keep: &[bool]) {
    let mut flags = keep.iter();
    cells.retain(|_| flags.next().copied().unwrap_or(false));
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(&key, v, out);
            }
        }
        other => {
            let key = if prefix.is_empty() { "value" } else { prefix };
            out.insert(key.to_string(), other.clone());
        }
    }
}

fn parse_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    let dotted = cell.replace(',', ".");
    match dotted.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) if dotted.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c)) => {
            Value::Number(n)
        }
        _ => Value::String(cell.to_string()),
    }
}
