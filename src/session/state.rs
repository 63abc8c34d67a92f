//! Authentication state of a session.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::XenApiError;
use crate::Result;

/// Supported login entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginMethod {
    /// `session.login_with_password`
    LoginWithPassword,
    /// `session.slave_local_login_with_password`
    SlaveLocalLoginWithPassword,
}

impl LoginMethod {
    pub const ALL: [LoginMethod; 2] = [
        LoginMethod::LoginWithPassword,
        LoginMethod::SlaveLocalLoginWithPassword,
    ];

    /// Remote method name, without the `session.` prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::LoginWithPassword => "login_with_password",
            LoginMethod::SlaveLocalLoginWithPassword => "slave_local_login_with_password",
        }
    }

    /// Look up a login variant by its remote method name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Local logins are ended with `session.local_logout`.
    pub fn is_local(&self) -> bool {
        matches!(self, LoginMethod::SlaveLocalLoginWithPassword)
    }

    /// Remote method name that ends a session opened by this login.
    pub fn logout_method(&self) -> &'static str {
        if self.is_local() {
            "local_logout"
        } else {
            "logout"
        }
    }
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginMethod {
    type Err = XenApiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| XenApiError::InvalidMethod(s.into()))
    }
}

/// Negotiated API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

/// Version assumed until a login has probed the server.
pub const API_VERSION_1_1: ApiVersion = ApiVersion::new(1, 1);
pub const API_VERSION_1_2: ApiVersion = ApiVersion::new(1, 2);

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Build a version from the values returned by
    /// `host.get_API_version_major` / `_minor`.
    ///
    /// The server may send the numbers as JSON numbers or as strings.
    pub fn from_values(major: &Value, minor: &Value) -> Result<Self> {
        Ok(Self::new(version_part(major)?, version_part(minor)?))
    }
}

fn version_part(value: &Value) -> Result<u32> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| XenApiError::Protocol(format!("invalid API version number: {}", value)))
}

impl Default for ApiVersion {
    fn default() -> Self {
        API_VERSION_1_1
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = XenApiError;

    fn from_str(s: &str) -> Result<Self> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| XenApiError::Protocol(format!("invalid API version: {}", s)))?;
        Ok(Self::new(
            version_part(&Value::String(major.into()))?,
            version_part(&Value::String(minor.into()))?,
        ))
    }
}

/// The login that produced the current token, kept for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct LastLogin {
    pub method: LoginMethod,
    pub args: Vec<Value>,
}

/// Token and login bookkeeping for one session.
///
/// `last_login` is only ever set together with a token obtained from a
/// login call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthState {
    token: String,
    api_version: ApiVersion,
    last_login: Option<LastLogin>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session token; empty when unauthenticated.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn last_login(&self) -> Option<&LastLogin> {
        self.last_login.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    pub(crate) fn record_login(&mut self, token: String, method: LoginMethod, args: Vec<Value>) {
        self.token = token;
        self.last_login = Some(LastLogin { method, args });
    }

    pub(crate) fn set_api_version(&mut self, version: ApiVersion) {
        self.api_version = version;
    }

    /// Use a token obtained elsewhere. There is nothing to replay for it.
    pub(crate) fn adopt(&mut self, token: String) {
        self.token = token;
        self.last_login = None;
    }

    /// Back to the unauthenticated initial state.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
