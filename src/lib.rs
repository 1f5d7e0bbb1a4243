//! `contentstack-http` is an async HTTP client for the Contentstack Content
//! Management API.
//!
//! Requests go through a resilient transport that
//! - admits them against a shared token-bucket budget ([`RateLimiter`]),
//! - retries connection failures and `429` responses with exponential
//!   backoff ([`RetryPolicy`]),
//! - aborts any wait when the caller's [`CancellationToken`] fires.
//!
//! Resource handlers use [`ContentstackClient::get`],
//! [`ContentstackClient::post`], [`ContentstackClient::put`] and
//! [`ContentstackClient::delete`].

mod client;
mod error;
mod options;
mod rate_limit;
mod retry;
mod transport;
mod wire;

pub use client::ContentstackClient;
pub use error::{BoxError, ContentstackError, Diagnostic};
pub use options::{ClientOptions, DEFAULT_BASE_URL};
pub use rate_limit::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use tokio_util::sync::CancellationToken;
pub use transport::{join_url, HttpSend, ReqwestSender, ResilientTransport};
pub use wire::{ApiRequest, ApiResponse, RemoteError};

pub type Result<T> = std::result::Result<T, ContentstackError>;
