//! Cell-to-string conversion rules applied to every value pulled off
//! the target database before it reaches the CSV encoder.
//!
//! Matches the Python original's conversion in `worker.py`: `NULL`
//! becomes an empty string, date/time-like values become ISO-8601
//! text, binary values are decoded as UTF-8 lossily, everything else
//! uses its default string form.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl CellValue {
    /// Render the cell the way it should appear in a CSV field.
    pub fn to_csv_field(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            CellValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}
