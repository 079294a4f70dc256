use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dataset::{DatasetSummary, Row};

const HEAD_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub count: usize,
}

/// Summary statistics stored beside a dataset's chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub shape: DatasetSummary,
    pub numeric_columns: Vec<String>,
    pub stats: BTreeMap<String, ColumnStats>,
    pub head: Vec<Row>,
}

impl DatasetProfile {
    pub fn from_rows(rows: &[Row]) -> Self {
        let shape = DatasetSummary::from_rows(rows);
        let mut numeric_columns = Vec::new();
        let mut stats = BTreeMap::new();

        for column in &shape.columns {
            let values = rows
                .iter()
                .filter_map(|row| row.get(column).and_then(numeric_value))
                .collect::<Vec<_>>();
            if let Some(column_stats) = column_stats(values) {
                numeric_columns.push(column.clone());
                stats.insert(column.clone(), column_stats);
            }
        }

        Self {
            shape,
            numeric_columns,
            stats,
            head: rows.iter().take(HEAD_ROWS).cloned().collect(),
        }
    }
}

/// Numbers, and strings that read as finite numbers (CSV cells arrive as text).
fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn column_stats(mut values: Vec<f64>) -> Option<ColumnStats> {
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    values.sort_by(f64::total_cmp);
    let median = if count % 2 == 0 {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    } else {
        values[count / 2]
    };

    Some(ColumnStats {
        min: values[0],
        max: values[count - 1],
        mean,
        median,
        count,
    })
}
