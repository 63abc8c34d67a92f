//! Transport boundary.
//!
//! The session layer only needs "send a method name and an ordered
//! argument list, get back a value or a fault". Everything about wire
//! encoding lives behind the [`Transport`] trait.

mod http;
mod target;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde_json::Value;

pub use http::{HttpOptions, HttpTransport, DEFAULT_TIMEOUT};
pub use target::{ConnectionTarget, HttpProxy, Scheme};

/// Sends one remote call and returns the raw response value.
///
/// Implementations must preserve argument order. The returned value is
/// expected to be a `Status` mapping; any transport-level problem is
/// reported as an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> crate::Result<Value>;
}
