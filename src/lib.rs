//! # xenapi
//!
//! Session-managing RPC client for the Xen hypervisor management API.
//!
//! Remote methods are named `class.method` (`VM.start`,
//! `host.get_API_version_major`, ...) and take the session token as their
//! first argument. This crate injects the token, notices when the server
//! has expired it, logs in again with the credentials of the last login
//! and retries the call.
//!
//! ## Features
//!
//! - **Open method namespace**: any `class.method` is callable, no typed
//!   bindings required
//! - **Transparent re-login**: expired sessions are renewed and the call
//!   retried, up to three attempts by default
//! - **Shared sessions**: one `Session` can serve many tasks; concurrent
//!   expiries trigger a single re-login
//! - **Pluggable transport**: JSON-RPC over HTTP(S) out of the box, or
//!   any [`Transport`] implementation
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use xenapi::Session;
//!
//! #[tokio::main]
//! async fn main() -> xenapi::Result<()> {
//!     xenapi::logging::try_init().ok();
//!
//!     let session = Session::new("https://xen01.example.com/", None)?;
//!     session.login_with_password("root", "secret").await?;
//!     println!("API version {}", session.api_version()?);
//!
//!     let vms = session.namespace("VM").call("get_all", vec![]).await?;
//!     for vm in vms.as_array().into_iter().flatten() {
//!         let record = session.call("VM.get_record", vec![vm.clone()]).await?;
//!         println!("{}", record["name_label"]);
//!     }
//!
//!     session.invoke("VM", "clone", vec![json!("OpaqueRef:..."), json!("copy")]).await?;
//!     session.logout().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use error::{Failure, Result, XenApiError};
pub use proxy::{Dispatcher, DEFAULT_RETRY_ATTEMPTS, SESSION_INVALID};
pub use session::{
    ApiVersion, AuthState, LastLogin, LoginMethod, Session, API_VERSION_1_1, API_VERSION_1_2,
};
pub use transport::{ConnectionTarget, HttpOptions, HttpProxy, HttpTransport, Transport};
