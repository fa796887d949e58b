//! Cell limiter transformer
//!
//! Google Sheets rejects cells over 50 000 characters. Oversized values are
//! cut well below that and marked.

use crate::etl::Transformer;
use eyre::Result;

pub const DEFAULT_MAX_CELL_CHARS: usize = 40_000;
pub const TRUNCATION_MARKER: &str = "\n[TRUNCATED]";

/// Transformer that truncates oversized cells
///
/// # Example
/// ```
/// use tabsync::etl::Transformer;
/// use tabsync::transform::CellLimiter;
///
/// let limiter = CellLimiter::new(5);
/// let row = limiter.transform(vec!["abcdefgh".to_string()]).unwrap();
/// assert_eq!(row[0], "abcde\n[TRUNCATED]");
/// ```
pub struct CellLimiter {
    max_chars: usize,
}

impl CellLimiter {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    fn limit(&self, value: String) -> String {
        match value.char_indices().nth(self.max_chars) {
            Some((cut, _)) => {
                let mut truncated = value;
                truncated.truncate(cut);
                truncated.push_str(TRUNCATION_MARKER);
                truncated
            }
            None => value,
        }
    }
}

impl Default for CellLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CELL_CHARS)
    }
}

impl Transformer for CellLimiter {
    type Input = Vec<String>;
    type Output = Vec<String>;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        Ok(input.into_iter().map(|v| self.limit(v)).collect())
    }
}
