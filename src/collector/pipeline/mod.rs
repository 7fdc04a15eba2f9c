//! Run execution: everything that happens for one account once it is scheduled

pub mod account_runner;

pub use account_runner::{AccountProgress, AccountRunner, FetcherFactory, ProgressBoard};
