//! Timestamp normalizer transformer
//!
//! Renders date and timestamp cells as spreadsheet-friendly text.

use crate::etl::{Cell, Transformer};
use crate::resilience::ResultCache;
use chrono::{NaiveDate, NaiveDateTime};
use eyre::Result;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Moment {
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Moment {
    fn render(self) -> String {
        match self {
            Self::Date(date) => date.format(DATE_FORMAT).to_string(),
            Self::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Transformer that converts `Date` and `Timestamp` cells to text
///
/// Sources tend to repeat the same handful of timestamps across rows
/// (creation dates, batch times), so rendered values are memoized in a
/// bounded cache shared across cycles.
///
/// # Example
/// ```
/// use tabsync::etl::{Cell, Transformer};
/// use tabsync::transform::TimestampNormalizer;
/// use chrono::NaiveDate;
///
/// let normalizer = TimestampNormalizer::new(16);
/// let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
///     .unwrap()
///     .and_hms_opt(9, 30, 0)
///     .unwrap();
///
/// let row = normalizer.transform(vec![Cell::Timestamp(ts), Cell::Int(7)]).unwrap();
/// assert_eq!(row[0], Cell::Text("2024-03-01 09:30:00".to_string()));
/// assert_eq!(row[1], Cell::Int(7));
/// ```
pub struct TimestampNormalizer {
    cache: ResultCache<Moment, String>,
}

impl TimestampNormalizer {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: ResultCache::new(cache_capacity),
        }
    }

    /// Cache hits since creation
    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    /// Cache misses since creation
    pub fn cache_misses(&self) -> u64 {
        self.cache.misses()
    }

    fn render(&self, moment: Moment) -> Cell {
        Cell::Text(self.cache.get_or_insert_with(moment, || moment.render()))
    }
}

impl Transformer for TimestampNormalizer {
    type Input = Vec<Cell>;
    type Output = Vec<Cell>;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        Ok(input
            .into_iter()
            .map(|cell| match cell {
                Cell::Date(date) => self.render(Moment::Date(date)),
                Cell::Timestamp(ts) => self.render(Moment::Timestamp(ts)),
                other => other,
            })
            .collect())
    }
}
