//! Transform implementations for extracted rows
//!
//! Each transformer does one thing. [`TabTransform`] chains them in the
//! order every source needs:
//!
//! ```text
//! TimestampNormalizer → GridFormatter → ColumnFitter → CellLimiter
//! ```

mod cell_limiter;
mod column_fitter;
mod grid_formatter;
mod timestamp_normalizer;

pub use cell_limiter::{CellLimiter, DEFAULT_MAX_CELL_CHARS, TRUNCATION_MARKER};
pub use column_fitter::ColumnFitter;
pub use grid_formatter::GridFormatter;
pub use timestamp_normalizer::{DATE_FORMAT, TIMESTAMP_FORMAT, TimestampNormalizer};

use crate::etl::{ExtractionResult, Transformer};
use eyre::Result;

/// The full chain from an [`ExtractionResult`] to the grid written to a tab.
///
/// Built once per source and reused every cycle, so the timestamp cache
/// carries over between cycles.
///
/// # Example
/// ```
/// use tabsync::etl::{Cell, ExtractionResult, Transformer};
/// use tabsync::transform::TabTransform;
///
/// let transform = TabTransform::new(3, 16);
/// let grid = transform
///     .transform(ExtractionResult {
///         header: vec!["id".into(), "active".into()],
///         rows: vec![vec![Cell::Int(1), Cell::Bool(true)]],
///     })
///     .unwrap();
///
/// assert_eq!(grid, vec![vec!["id", "active", ""], vec!["1", "TRUE", ""]]);
/// ```
pub struct TabTransform {
    normalizer: TimestampNormalizer,
    formatter: GridFormatter,
    fitter: ColumnFitter,
    limiter: CellLimiter,
}

impl TabTransform {
    /// Chain for a tab `width` columns wide.
    pub fn new(width: usize, cache_capacity: usize) -> Self {
        Self {
            normalizer: TimestampNormalizer::new(cache_capacity),
            formatter: GridFormatter,
            fitter: ColumnFitter::new(width),
            limiter: CellLimiter::default(),
        }
    }

    pub fn normalizer(&self) -> &TimestampNormalizer {
        &self.normalizer
    }

    fn finish(&self, row: Vec<String>) -> Result<Vec<String>> {
        self.limiter.transform(self.fitter.transform(row)?)
    }
}

impl Transformer for TabTransform {
    type Input = ExtractionResult;
    /// Header first, then one row per extracted row
    type Output = Vec<Vec<String>>;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        let mut grid = Vec::with_capacity(input.rows.len() + 1);
        grid.push(self.finish(input.header)?);

        for row in input.rows {
            let row = self.normalizer.transform(row)?;
            let row = self.formatter.transform(row)?;
            grid.push(self.finish(row)?);
        }

        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::Cell;
    use chrono::NaiveDate;

    #[test]
    fn test_full_chain() {
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let transform = TabTransform::new(2, 4);

        let grid = transform
            .transform(ExtractionResult {
                header: vec!["id".into(), "created_at".into(), "note".into()],
                rows: vec![
                    vec![Cell::Int(1), Cell::Timestamp(ts), Cell::Text("x".repeat(50_000))],
                    vec![Cell::Int(2), Cell::Timestamp(ts), Cell::Null],
                ],
            })
            .unwrap();

        assert_eq!(grid.len(), 3);
        // The range is narrower than the query, every column still goes out
        assert_eq!(grid[0], vec!["id", "created_at", "note"]);
        assert_eq!(grid[1][1], "2024-02-29 12:00:00");
        assert!(grid[1][2].ends_with(TRUNCATION_MARKER));
        assert_eq!(grid[2], vec!["2", "2024-02-29 12:00:00", ""]);
        assert_eq!(transform.normalizer().cache_hits(), 1);
    }

    #[test]
    fn test_oversized_cells_are_truncated() {
        let transform = TabTransform::new(1, 0);
        let grid = transform
            .transform(ExtractionResult {
                header: vec!["history".into()],
                rows: vec![vec![Cell::Text("y".repeat(DEFAULT_MAX_CELL_CHARS + 1))]],
            })
            .unwrap();

        assert!(grid[1][0].ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_empty_result_is_header_only() {
        let transform = TabTransform::new(2, 4);
        let grid = transform
            .transform(ExtractionResult {
                header: vec!["id".into(), "name".into()],
                rows: vec![],
            })
            .unwrap();
        assert_eq!(grid, vec![vec!["id", "name"]]);
    }
}
