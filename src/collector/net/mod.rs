//! Outbound network plumbing: throttling, retry and media fetch

pub mod fetch;
pub mod retry;
pub mod throttle;

pub use fetch::{FetchBytes, FetchError, FetchResult, HttpFetcher, HttpFetcherConfig, ProxyConfig, DEFAULT_USER_AGENT};
pub use retry::{with_retry, with_retry_async, RetryClassify, RetryConfig};
pub use throttle::{Throttle, ThrottleConfig};
