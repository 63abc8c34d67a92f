//! Session management module.
//!
//! A [`Session`] owns the connection target and the authentication
//! state: the token, the login used to obtain it, and the negotiated API
//! version.

mod client;
mod state;

pub use client::Session;
pub use state::{ApiVersion, AuthState, LastLogin, LoginMethod, API_VERSION_1_1, API_VERSION_1_2};
