#![warn(missing_docs)]
//! Runmark Series Statistics
//!
//! Reduces one monitor's sample series to a fixed summary:
//! - Extremes and the last observed value
//! - Mean, median and sample standard deviation
//! - The p95 tail by linear interpolation
//! - Time-weighted mean for irregularly spaced samples
//!
//! Only a single run is ever summarized; there is no cross-run analysis here.

mod percentiles;
mod summary;

pub use summary::{SeriesSummary, summarize, time_weighted_mean};
