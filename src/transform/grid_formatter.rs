//! Grid formatter transformer
//!
//! Turns typed cells into the strings written to the spreadsheet.

use super::timestamp_normalizer::{DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::etl::{Cell, Transformer};
use eyre::Result;

/// Transformer that renders a row of cells as text
///
/// Rules:
/// - `Null` becomes an empty cell
/// - booleans become `TRUE` / `FALSE` so the sheet parses them as booleans
/// - JSON is written compact
///
/// # Example
/// ```
/// use tabsync::etl::{Cell, Transformer};
/// use tabsync::transform::GridFormatter;
///
/// let row = GridFormatter
///     .transform(vec![Cell::Null, Cell::Bool(true), Cell::Int(3)])
///     .unwrap();
/// assert_eq!(row, vec!["", "TRUE", "3"]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct GridFormatter;

impl GridFormatter {
    pub fn format_cell(cell: Cell) -> String {
        match cell {
            Cell::Null => String::new(),
            Cell::Bool(true) => "TRUE".to_string(),
            Cell::Bool(false) => "FALSE".to_string(),
            Cell::Int(n) => n.to_string(),
            Cell::Float(f) => format!("{:?}", f),
            Cell::Decimal(text) | Cell::Text(text) => text,
            Cell::Date(date) => date.format(DATE_FORMAT).to_string(),
            Cell::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            Cell::Json(value) => value.to_string(),
        }
    }
}

impl Transformer for GridFormatter {
    type Input = Vec<Cell>;
    type Output = Vec<String>;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        Ok(input.into_iter().map(Self::format_cell).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_format_rules() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();

        let row = GridFormatter
            .transform(vec![
                Cell::Null,
                Cell::Bool(false),
                Cell::Int(-12),
                Cell::Float(1.0),
                Cell::Float(2.75),
                Cell::Decimal("10.50".to_string()),
                Cell::Text("ann".to_string()),
                Cell::Timestamp(ts),
                Cell::Json(json!({"a": [1, 2]})),
            ])
            .unwrap();

        assert_eq!(
            row,
            vec![
                "",
                "FALSE",
                "-12",
                "1.0",
                "2.75",
                "10.50",
                "ann",
                "2024-05-06 07:08:09",
                r#"{"a":[1,2]}"#,
            ]
        );
    }
}
