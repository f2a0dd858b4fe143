//! # alive-core
//!
//! Foundation types shared by the Alive client crates:
//!
//! - **Errors**: [`Cancelled`], [`WaitError`], [`RetryError`] via `thiserror`
//! - **Timers**: cancellable [`wait`](retry::wait) and [`timeout`](retry::timeout)
//! - **Backoff**: [`RetryConfig`], [`Backoff`] and the async [`retry`](retry::retry) loop
//! - **Subscribers**: the [`SubscriberKey`] bound and the [`SubscriberId`] handle
//! - **Logging**: `tracing` subscriber setup and a capture layer for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;

pub use errors::{Cancelled, RetryError, WaitError};
pub use ids::{SubscriberId, SubscriberKey};
pub use retry::{Backoff, RetryConfig};
pub use tokio_util::sync::CancellationToken;
