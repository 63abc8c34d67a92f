//! Classification of `Status` responses.

use serde_json::Value;

use crate::error::{Failure, XenApiError};

/// Error code the server uses for an expired or unknown session.
pub const SESSION_INVALID: &str = "SESSION_INVALID";

/// What a single response means to the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Classified {
    Success(Value),
    /// Re-login and retry. Never leaves the proxy module.
    SessionInvalid,
    Failure(Failure),
    Malformed(String),
}

impl Classified {
    /// Convert to a caller-facing result.
    ///
    /// `on_session_invalid` is the error to report when the caller cannot
    /// recover from an invalid session itself.
    pub(crate) fn into_result(
        self,
        on_session_invalid: XenApiError,
    ) -> Result<Value, XenApiError> {
        match self {
            Classified::Success(value) => Ok(value),
            Classified::SessionInvalid => Err(on_session_invalid),
            Classified::Failure(failure) => Err(failure.into()),
            Classified::Malformed(message) => Err(XenApiError::Protocol(message)),
        }
    }
}

/// Classify the raw value a transport returned for one call.
pub(crate) fn classify(response: Value) -> Classified {
    let Value::Object(mut fields) = response else {
        return Classified::Malformed(format!(
            "missing Status in response from server: {}",
            response
        ));
    };

    if !fields.contains_key("Status") {
        return Classified::Malformed(format!(
            "missing Status in response from server: {}",
            Value::Object(fields)
        ));
    }

    if fields.get("Status").and_then(Value::as_str) == Some("Success") {
        return match fields.remove("Value") {
            Some(value) => Classified::Success(value),
            None => Classified::Malformed("missing Value in response from server".into()),
        };
    }

    match fields.get("ErrorDescription") {
        Some(Value::Array(description)) => {
            if description.first().and_then(Value::as_str) == Some(SESSION_INVALID) {
                Classified::SessionInvalid
            } else {
                Classified::Failure(Failure::from_description(description))
            }
        }
        Some(other) => Classified::Malformed(format!(
            "ErrorDescription is not a list: {}",
            other
        )),
        None => Classified::Malformed("missing ErrorDescription in response from server".into()),
    }
}
