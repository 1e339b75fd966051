use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Invoice payload returned by the Devman reviewer invoice endpoint.
#[derive(Deserialize, Debug, Clone)]
pub struct Invoice {
    pub month_reviews: RowSet,
    pub summary: RowSet,
    /// Reviewer username -> Telegram handle, in the order the API sent them.
    /// Numeric Telegram ids arrive as their decimal text.
    #[serde(deserialize_with = "deserialize_handles")]
    pub dvmn_reviewers: IndexMap<String, Option<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHandle {
    Text(String),
    Id(i64),
}

fn deserialize_handles<'de, D>(deserializer: D) -> Result<IndexMap<String, Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = IndexMap::<String, Option<RawHandle>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(username, handle)| {
            let handle = handle.map(|handle| match handle {
                RawHandle::Text(text) => text,
                RawHandle::Id(id) => id.to_string(),
            });
            (username, handle)
        })
        .collect())
}

impl Invoice {
    /// Reviewers with their contact handle; blank handles come back as `None`.
    pub fn reviewers(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.dvmn_reviewers.iter().map(|(username, telegram)| {
            let telegram = telegram
                .as_deref()
                .map(str::trim)
                .filter(|handle| !handle.is_empty());
            (username.as_str(), telegram)
        })
    }

    pub fn summary_for(&self, reviewer: &str, reviewer_column: &str) -> RowSet {
        self.summary.filter_eq(reviewer_column, reviewer)
    }

    pub fn reviews_for(&self, reviewer: &str, reviewer_column: &str) -> RowSet {
        self.month_reviews.filter_eq(reviewer_column, reviewer)
    }
}

/// A table with named columns and rows of JSON scalars.
///
/// Accepts either a list of records or a column -> values object on the wire.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(try_from = "RawRowSet")]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRowSet {
    Records(Vec<Map<String, Value>>),
    Columns(IndexMap<String, Vec<Value>>),
}

impl TryFrom<RawRowSet> for RowSet {
    type Error = String;

    fn try_from(raw: RawRowSet) -> Result<Self, Self::Error> {
        match raw {
            RawRowSet::Records(records) => Ok(Self::from_records(records)),
            RawRowSet::Columns(columns) => Self::from_columns(columns),
        }
    }
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Columns are the union of record keys in first-seen order; absent
    /// cells are null.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|column| record.remove(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn from_columns(columns: IndexMap<String, Vec<Value>>) -> Result<Self, String> {
        let height = columns.values().next().map_or(0, Vec::len);
        if let Some((name, values)) = columns.iter().find(|(_, values)| values.len() != height) {
            return Err(format!(
                "column {name:?} has {} values, expected {height}",
                values.len()
            ));
        }

        let mut rows = vec![Vec::with_capacity(columns.len()); height];
        let names = columns.keys().cloned().collect();
        for values in columns.into_values() {
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        }

        Ok(Self {
            columns: names,
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows whose `column` equals `value`, keeping every column and the
    /// original order. A missing column selects nothing.
    pub fn filter_eq(&self, column: &str, value: &str) -> RowSet {
        let Some(index) = self.columns.iter().position(|c| c == column) else {
            return RowSet::new(self.columns.clone(), Vec::new());
        };

        let rows = self
            .rows
            .iter()
            .filter(|row| row.get(index).is_some_and(|cell| cell_equals(cell, value)))
            .cloned()
            .collect();

        RowSet::new(self.columns.clone(), rows)
    }
}

fn cell_equals(cell: &Value, value: &str) -> bool {
    match cell {
        Value::String(s) => s == value,
        Value::Number(n) => n.to_string() == value,
        _ => false,
    }
}
