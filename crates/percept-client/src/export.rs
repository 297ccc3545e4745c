use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PerceptError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    #[default]
    Json,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = PerceptError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(PerceptError::Config(format!(
                "unknown export format '{}': expected csv or json",
                other
            ))),
        }
    }
}

/// Collected trial data, one JSON record per finished trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet(Vec<Value>);

impl ResultSet {
    pub fn new(records: Vec<Value>) -> Self {
        Self(records)
    }

    pub fn records(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.0).map_err(|e| PerceptError::Export(e.to_string()))
    }

    // Columns are the union of record keys, taken record by record; absent cells
    // are left empty.
    pub fn to_csv(&self) -> Result<String> {
        let rows: Vec<Map<String, Value>> = self.0.iter().map(record_fields).collect();
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&columns)
            .map_err(|e| PerceptError::Export(e.to_string()))?;
        for row in &rows {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| row.get(c).map(cell_text).unwrap_or_default())
                .collect();
            writer
                .write_record(&cells)
                .map_err(|e| PerceptError::Export(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PerceptError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| PerceptError::Export(e.to_string()))
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Csv => self.to_csv(),
            ExportFormat::Json => self.to_json(),
        }
    }
}

impl From<Vec<Value>> for ResultSet {
    fn from(records: Vec<Value>) -> Self {
        Self(records)
    }
}

fn record_fields(record: &Value) -> Map<String, Value> {
    match record {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_uses_union_of_keys() {
        let set = ResultSet::new(vec![
            json!({"rt": 512, "key_press": 70}),
            json!({"rt": 430, "correct": true}),
        ]);
        let csv = set.to_csv().expect("csv");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        let header: Vec<&str> = lines[0].split(',').collect();
        assert_eq!(header.len(), 3);
        assert!(header.contains(&"rt") && header.contains(&"key_press") && header.contains(&"correct"));
        let rt_col = header.iter().position(|h| *h == "rt").expect("rt column");
        assert_eq!(lines[2].split(',').nth(rt_col), Some("430"));
    }

    #[test]
    fn csv_quotes_text_with_commas() {
        let set = ResultSet::new(vec![json!({"stimulus": "red, green", "nested": {"a": 1}})]);
        let csv = set.to_csv().expect("csv");
        assert!(csv.contains("\"red, green\""), "{}", csv);
        assert!(csv.contains("{\"\"a\"\":1}"), "{}", csv);
    }

    #[test]
    fn json_export_is_an_array() {
        let set = ResultSet::new(vec![json!({"rt": 1}), json!({"rt": 2})]);
        let text = set.export(ExportFormat::Json).expect("json");
        let parsed: Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(parsed, json!([{"rt": 1}, {"rt": 2}]));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("csv".parse::<ExportFormat>().expect("csv"), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().expect("json"), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
