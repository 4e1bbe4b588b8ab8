#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod join;
pub mod load;
pub mod shuffle;

pub use crate::load::{SampleSet, SplitTable};
