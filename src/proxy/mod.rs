//! Call dispatch: token injection, response classification and the
//! re-login retry loop.

mod dispatcher;
mod response;

pub use dispatcher::{Dispatcher, DEFAULT_RETRY_ATTEMPTS};
pub use response::SESSION_INVALID;
