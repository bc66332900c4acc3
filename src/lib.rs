//! `lichess-http` is an async client for the Lichess web API.
//!
//! Every call goes through one transport that:
//! - retries transient network faults with capped exponential backoff
//! - honours `429 Too Many Requests` and its `Retry-After` hint
//! - decodes NDJSON streams lazily through [`NdjsonStream`]
//! - observes a caller-supplied `CancellationToken` at every await point
//!
//! Entry points live on [`LichessClient`]:
//! - [`LichessClient::execute`]
//! - [`LichessClient::send_json`]
//! - [`LichessClient::send_text`]
//! - [`LichessClient::execute_streaming`]

mod backoff;
mod classify;
mod client;
mod codec;
mod error;
mod options;
mod rate_limit;
mod request;
mod stream;
mod transport;

pub use backoff::backoff_delay;
pub use classify::{classify, failed_before_send, FaultClass};
pub use client::LichessClient;
pub use codec::JsonCodec;
pub use error::LichessError;
pub use options::{ClientOptions, DEFAULT_API_URL, DEFAULT_EXPLORER_URL, DEFAULT_TABLEBASE_URL};
pub use rate_limit::{RateLimitSignal, RetryHint, DEFAULT_RATE_LIMIT_FALLBACK};
pub use request::{Host, Request};
pub use stream::NdjsonStream;

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, LichessError>;
