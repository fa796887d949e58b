//! Column fitter transformer

use crate::etl::Transformer;
use eyre::Result;

/// Transformer that pads rows out to the tab's column range
///
/// Short rows get empty cells so stale values in the range are
/// overwritten. Rows wider than the range are kept whole: the grid is
/// written from the top-left cell and the range only bounds clearing.
pub struct ColumnFitter {
    width: usize,
}

impl ColumnFitter {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Transformer for ColumnFitter {
    type Input = Vec<String>;
    type Output = Vec<String>;

    fn transform(&self, mut input: Self::Input) -> Result<Self::Output> {
        if input.len() < self.width {
            input.resize(self.width, String::new());
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_pads_short_rows() {
        let fitted = ColumnFitter::new(4).transform(row(&["a", "b"])).unwrap();
        assert_eq!(fitted, row(&["a", "b", "", ""]));
    }

    #[test]
    fn test_keeps_columns_beyond_range() {
        let fitted = ColumnFitter::new(2).transform(row(&["a", "b", "c"])).unwrap();
        assert_eq!(fitted, row(&["a", "b", "c"]));
    }

    #[test]
    fn test_exact_width_untouched() {
        let fitted = ColumnFitter::new(3).transform(row(&["a", "b", "c"])).unwrap();
        assert_eq!(fitted.len(), 3);
    }
}
