//! JSON-RPC over HTTP(S).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::trace;

use super::{ConnectionTarget, HttpProxy, Transport};
use crate::error::XenApiError;
use crate::Result;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for building an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Proxy to tunnel requests through.
    pub proxy: Option<HttpProxy>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Verify the server certificate on https targets.
    pub verify_tls: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
            verify_tls: true,
        }
    }
}

/// Transport that posts JSON-RPC 2.0 requests to the management endpoint.
///
/// JSON-RPC answers are normalised into the `Status`/`Value`/
/// `ErrorDescription` mapping the session layer classifies.
pub struct HttpTransport {
    http: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for the given target.
    pub fn new(target: &ConnectionTarget, options: &HttpOptions) -> Result<Self> {
        let mut builder = Client::builder().timeout(options.timeout);

        if let Some(ref proxy) = options.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }

        if target.use_tls() && !options.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: target.endpoint(),
            next_id: AtomicU64::new(1),
        })
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        trace!(id, method, "posting request");
        let response = self.http.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(XenApiError::Transport(format!(
                "{} returned {}: {}",
                self.endpoint, status, body
            )));
        }

        let body: Value = response.json().await?;
        Ok(normalize_response(body))
    }
}

/// Map a JSON-RPC response body onto the `Status` mapping.
///
/// Bodies with neither `result` nor `error` are returned as they are.
pub(crate) fn normalize_response(body: Value) -> Value {
    let Value::Object(mut fields) = body else {
        return body;
    };

    if let Some(error) = fields.get("error").filter(|e| !e.is_null()) {
        let mut description = vec![error
            .get("message")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()))];
        match error.get("data") {
            Some(Value::Array(data)) => description.extend(data.iter().cloned()),
            Some(Value::Null) | None => {}
            Some(other) => description.push(other.clone()),
        }
        return json!({ "Status": "Failure", "ErrorDescription": description });
    }

    match fields.remove("result") {
        Some(result) => json!({ "Status": "Success", "Value": result }),
        None => Value::Object(fields),
    }
}
