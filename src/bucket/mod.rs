//! Time bucketing: granularity parsing, calendar flooring and bucketed keys.

pub mod calendar;
pub mod granularity;
pub mod key;

pub use calendar::{Calendar, Timeline, TimelineIter};
pub use granularity::{Granularity, GranularitySpec, TimeUnit};
pub use key::{AddressingMode, BucketKey, Identifier, KeySignature, DEFAULT_SEPARATOR};
