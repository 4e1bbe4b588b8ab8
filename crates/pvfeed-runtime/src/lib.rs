#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod feed;
pub mod plan;
pub mod runlog;
pub mod session;
pub mod store;
pub mod types;
