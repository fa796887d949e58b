//! Rate-limited publishing to the destination spreadsheet
//!
//! A single [`Publisher`] is shared by every pipeline. All writes pass
//! through its [`QuotaLimiter`], so the destination's per-window quota is
//! respected no matter how many sources finish at once.

mod limiter;
mod publisher;

pub use limiter::{QuotaConfig, QuotaLimiter};
pub use publisher::{Destination, PublishRequest, PublishTiming, Publisher};
