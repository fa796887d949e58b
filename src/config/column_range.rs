//! Spreadsheet column ranges such as `A:R`

use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

static RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]{1,3}):([A-Za-z]{1,3})$").expect("valid regex"));

/// An inclusive range of spreadsheet columns, e.g. `A:R`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRange {
    start: String,
    end: String,
}

impl ColumnRange {
    /// First column letter(s)
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Last column letter(s)
    pub fn end(&self) -> &str {
        &self.end
    }

    /// Number of columns covered by the range.
    pub fn width(&self) -> usize {
        column_index(&self.end) - column_index(&self.start) + 1
    }
}

impl FromStr for ColumnRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RANGE
            .captures(s.trim())
            .ok_or_else(|| format!("column range must look like 'A:Z', got '{}'", s))?;
        let start = caps[1].to_uppercase();
        let end = caps[2].to_uppercase();

        if column_index(&start) > column_index(&end) {
            return Err(format!("column range '{}' ends before it starts", s));
        }

        Ok(Self { start, end })
    }
}

impl std::fmt::Display for ColumnRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// 1-based index of a column: `A` = 1, `Z` = 26, `AA` = 27.
pub fn column_index(letters: &str) -> usize {
    letters
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .fold(0, |acc, c| {
            acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)
        })
}

/// Column letters for a 1-based index, the inverse of [`column_index`].
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let remainder = (index - 1) % 26;
        letters.push((b'A' + remainder as u8) as char);
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A"), 1);
        assert_eq!(column_index("R"), 18);
        assert_eq!(column_index("Z"), 26);
        assert_eq!(column_index("AA"), 27);
        assert_eq!(column_index("ax"), 50);
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(24), "X");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(702), "ZZ");
        assert_eq!(column_letter(0), "");
    }

    #[test]
    fn test_parse_range() {
        let range: ColumnRange = "a:r".parse().unwrap();
        assert_eq!(range.start(), "A");
        assert_eq!(range.end(), "R");
        assert_eq!(range.width(), 18);
        assert_eq!(range.to_string(), "A:R");

        let offset: ColumnRange = "C:E".parse().unwrap();
        assert_eq!(offset.width(), 3);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!("AR".parse::<ColumnRange>().is_err());
        assert!("R:A".parse::<ColumnRange>().is_err());
        assert!("A1:B2".parse::<ColumnRange>().is_err());
    }
}
