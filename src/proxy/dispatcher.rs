//! Session-injecting call dispatch with re-login and retry.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::response::{classify, Classified};
use crate::error::XenApiError;
use crate::session::{LoginMethod, Session};
use crate::Result;

/// Default number of attempts for a call whose session keeps expiring.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

const SESSION_PREFIX: &str = "session.";

/// Remote methods that end a session.
fn is_logout(method: &str) -> bool {
    matches!(method, "logout" | "local_logout")
}

/// Resets the session state when dropped, so logout cleans up on every
/// exit path, including errors and cancellation.
struct ClearOnDrop<'a>(&'a Session);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.clear_auth();
        info!("session state cleared");
    }
}

/// Calls remote methods under one namespace prefix, such as `VM.`.
///
/// Every call gets the current session token as its first argument.
/// When the server reports `SESSION_INVALID` the last login is replayed
/// and the call retried, up to the session's retry budget.
///
/// A dispatcher borrows its [`Session`] and holds no state of its own
/// besides the prefix and any bound arguments.
#[derive(Debug, Clone)]
pub struct Dispatcher<'a> {
    session: &'a Session,
    prefix: String,
    bound: Vec<Value>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(session: &'a Session, prefix: String, bound: Vec<Value>) -> Self {
        Self {
            session,
            prefix,
            bound,
        }
    }

    /// Namespace prefix, including the trailing dot.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Arguments placed in front of every call made through this dispatcher.
    pub fn bound_args(&self) -> &[Value] {
        &self.bound
    }

    /// Fully qualified remote method name.
    pub fn qualified(&self, method: &str) -> String {
        format!("{}{}", self.prefix, method)
    }

    fn is_session(&self) -> bool {
        self.prefix == SESSION_PREFIX
    }

    /// Call `<prefix><method>` with `args`.
    ///
    /// Login variants under `session.` are sent as they are, without a
    /// token. `session.logout` and `session.local_logout` reset the
    /// session state whatever the outcome.
    ///
    /// Any method name is accepted, including ones like `clone` that
    /// collide with Rust trait methods on the dispatcher itself.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let _cleanup = (self.is_session() && is_logout(method)).then(|| ClearOnDrop(self.session));

        if self.is_session() {
            if let Some(login) = LoginMethod::from_name(method) {
                return self.call_login(login, args).await;
            }
        }

        self.call_with_retry(method, &args).await
    }

    /// Send a login call without a token.
    pub(crate) async fn call_login(&self, login: LoginMethod, args: Vec<Value>) -> Result<Value> {
        let name = self.qualified(login.as_str());
        debug!(method = %name, "login call");
        self.send(&name, self.params(None, &args))
            .await?
            .into_result(XenApiError::SessionInvalidOnLogin)
    }

    /// One token-injected attempt with no re-login.
    ///
    /// Used while a login is in progress, where an invalid session
    /// means the login itself did not take.
    pub(crate) async fn call_once(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let name = self.qualified(method);
        let token = self.session.session_id()?;
        debug!(method = %name, "call without re-login");
        self.send(&name, self.params(Some(token), &args))
            .await?
            .into_result(XenApiError::SessionInvalidOnLogin)
    }

    async fn call_with_retry(&self, method: &str, args: &[Value]) -> Result<Value> {
        let name = self.qualified(method);
        let budget = self.session.retry_attempts();
        let mut attempt = 0;

        while attempt < budget {
            let token = self.session.session_id()?;
            debug!(method = %name, attempt = attempt + 1, "remote call");

            match self.send(&name, self.params(Some(token.clone()), args)).await? {
                Classified::SessionInvalid => {
                    if !self.session.has_replayable_login()? {
                        return Err(XenApiError::AuthenticationRequired);
                    }
                    attempt += 1;
                    warn!(method = %name, attempt, budget, "session invalid");
                    if attempt < budget {
                        self.session.replay_login(&token).await?;
                    }
                }
                other => return other.into_result(XenApiError::AuthenticationRequired),
            }
        }

        Err(XenApiError::RetryBudgetExhausted { attempts: budget })
    }

    fn params(&self, token: Option<String>, args: &[Value]) -> Vec<Value> {
        let mut params = Vec::with_capacity(self.bound.len() + args.len() + 1);
        params.extend(self.bound.iter().cloned());
        if let Some(token) = token {
            params.push(Value::String(token));
        }
        params.extend(args.iter().cloned());
        params
    }

    async fn send(&self, name: &str, params: Vec<Value>) -> Result<Classified> {
        let response = self.session.transport().call(name, params).await?;
        Ok(classify(response))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::session::API_VERSION_1_1;
    use crate::transport::fake::{self, failure, session_invalid, success, FakeXapi};

    fn logins(fake: &FakeXapi) -> usize {
        fake.count("session.login_with_password")
    }

    #[tokio::test]
    async fn test_call_injects_token_from_login() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        assert_ok!(session.login_with_password("root", "secret").await);

        let vms = session
            .namespace("VM")
            .call("get_all", vec![])
            .await
            .unwrap();
        assert_eq!(vms, json!(["OpaqueRef:vm0", "OpaqueRef:vm1"]));

        let (method, params) = fake.calls().pop().unwrap();
        assert_eq!(method, "VM.get_all");
        assert_eq!(params, vec![json!("OpaqueRef:session-1")]);
    }

    #[tokio::test]
    async fn test_argument_order_preserved() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();

        let _ = session
            .namespace("VM")
            .call("set_name_label", vec![json!("OpaqueRef:vm0"), json!("web01")])
            .await;

        let (_, params) = fake.calls().pop().unwrap();
        assert_eq!(
            params,
            vec![json!("OpaqueRef:session-1"), json!("OpaqueRef:vm0"), json!("web01")]
        );
    }

    #[tokio::test]
    async fn test_failure_surfaces_verbatim() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        fake.script(
            "VM.start",
            Ok(failure(&["VM_BAD_POWER_STATE", "OpaqueRef:vm0", "halted", "running"])),
        );

        let err = session
            .namespace("VM")
            .call("start", vec![json!("OpaqueRef:vm0"), json!(false), json!(false)])
            .await
            .unwrap_err();

        let failure = err.as_failure().expect("remote failure");
        assert_eq!(failure.error_type, "VM_BAD_POWER_STATE");
        assert_eq!(failure.error_details, vec!["OpaqueRef:vm0", "halted", "running"]);
        assert_eq!(fake.count("VM.start"), 1);
        assert_eq!(logins(&fake), 1);
    }

    #[tokio::test]
    async fn test_session_invalid_replays_last_login() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        let login_args = vec![json!("root"), json!("secret"), json!("2.21"), json!("ops")];
        session
            .login(LoginMethod::LoginWithPassword, login_args.clone())
            .await
            .unwrap();

        fake.expire_session();
        let vms = session.namespace("VM").call("get_all", vec![]).await;
        assert_eq!(vms.unwrap(), json!(["OpaqueRef:vm0", "OpaqueRef:vm1"]));

        let replays: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|(m, _)| m == "session.login_with_password")
            .collect();
        assert_eq!(replays.len(), 2);
        assert_eq!(replays[1].1, login_args);

        assert_eq!(fake.count("VM.get_all"), 2);
        assert_eq!(session.session_id().unwrap(), "OpaqueRef:session-2");
        let (_, params) = fake.calls().pop().unwrap();
        assert_eq!(params, vec![json!("OpaqueRef:session-2")]);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        for _ in 0..4 {
            fake.script("VM.get_all", Ok(session_invalid()));
        }

        let err = session
            .namespace("VM")
            .call("get_all", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, XenApiError::RetryBudgetExhausted { attempts: 3 }));
        assert!(err.is_transport_fault());
        assert_eq!(fake.count("VM.get_all"), 3);
        // Initial login plus one replay before attempts 2 and 3.
        assert_eq!(logins(&fake), 3);
    }

    #[tokio::test]
    async fn test_custom_retry_budget() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake).with_retry_attempts(1);
        session.login_with_password("root", "secret").await.unwrap();
        fake.script("VM.get_all", Ok(session_invalid()));

        let err = session.invoke("VM", "get_all", vec![]).await.unwrap_err();
        assert!(matches!(err, XenApiError::RetryBudgetExhausted { attempts: 1 }));
        assert_eq!(logins(&fake), 1);
    }

    #[tokio::test]
    async fn test_session_invalid_without_login() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);

        let err = session
            .namespace("VM")
            .call("get_all", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, XenApiError::AuthenticationRequired));
        assert_eq!(err.fault_code(), Some(401));
        assert_eq!(fake.count("VM.get_all"), 1);
        assert_eq!(logins(&fake), 0);
    }

    #[tokio::test]
    async fn test_adopted_token_cannot_be_renewed() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.adopt_session_id("OpaqueRef:from-elsewhere").unwrap();

        let err = session.invoke("VM", "get_all", vec![]).await.unwrap_err();
        assert!(matches!(err, XenApiError::AuthenticationRequired));

        let (_, params) = fake.calls().pop().unwrap();
        assert_eq!(params, vec![json!("OpaqueRef:from-elsewhere")]);
    }

    #[tokio::test]
    async fn test_logout_resets_state_on_failure() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        assert_ne!(session.api_version().unwrap(), API_VERSION_1_1);
        fake.script("session.logout", Ok(failure(&["INTERNAL_ERROR", "boom"])));

        let err = assert_err!(session.logout().await);
        assert!(matches!(err, XenApiError::Failure(_)));

        let state = session.auth_state().unwrap();
        assert_eq!(state, crate::session::AuthState::default());
        assert!(!session.is_authenticated().unwrap());
        assert_eq!(session.api_version().unwrap(), API_VERSION_1_1);
    }

    #[tokio::test]
    async fn test_logout_resets_state_on_transport_error() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        fake.script(
            "session.logout",
            Err(XenApiError::Transport("connection reset".into())),
        );

        assert!(session.logout().await.is_err());
        assert_eq!(session.session_id().unwrap(), "");
        assert_eq!(session.last_login_method().unwrap(), None);
    }

    #[tokio::test]
    async fn test_explicit_logout_call_resets_state() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();

        assert_ok!(session.namespace("session").call("logout", vec![]).await);
        assert!(!session.is_authenticated().unwrap());
    }

    #[tokio::test]
    async fn test_login_call_is_not_injected() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);

        let token = session
            .namespace("session")
            .call("login_with_password", vec![json!("root"), json!("secret")])
            .await
            .unwrap();
        assert_eq!(token, json!("OpaqueRef:session-1"));

        let (method, params) = fake.calls().pop().unwrap();
        assert_eq!(method, "session.login_with_password");
        assert_eq!(params, vec![json!("root"), json!("secret")]);
    }

    #[tokio::test]
    async fn test_session_invalid_on_login_call() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        fake.script("session.login_with_password", Ok(session_invalid()));

        let err = session
            .namespace("session")
            .call("login_with_password", vec![json!("root"), json!("secret")])
            .await
            .unwrap_err();
        assert!(matches!(err, XenApiError::SessionInvalidOnLogin));
        assert_eq!(logins(&fake), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_not_retried() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        fake.script("VM.get_all", Ok(json!({"Value": []})));

        let err = session.invoke("VM", "get_all", vec![]).await.unwrap_err();
        assert!(matches!(err, XenApiError::Protocol(ref m) if m.contains("Status")));
        assert_eq!(fake.count("VM.get_all"), 1);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        fake.script("VM.get_all", Err(XenApiError::Transport("timed out".into())));

        let err = session.invoke("VM", "get_all", vec![]).await.unwrap_err();
        assert!(matches!(err, XenApiError::Transport(_)));
        assert_eq!(logins(&fake), 1);
    }

    #[tokio::test]
    async fn test_clone_is_a_remote_method() {
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();

        let vm = session.namespace("VM");
        let copy = vm
            .call("clone", vec![json!("OpaqueRef:vm0"), json!("web02")])
            .await
            .unwrap();
        assert_eq!(copy, json!("OpaqueRef:vm-clone"));
        assert_eq!(fake.count("VM.clone"), 1);

        // The Rust-side clone copies the dispatcher without a remote call.
        let twin = vm.clone();
        assert_eq!(twin.prefix(), "VM.");
        assert_eq!(fake.count("VM.clone"), 1);
    }

    #[tokio::test]
    async fn test_bound_args_precede_token() {
        // Literal XML-RPC proxy behavior, kept on purpose: bound args go
        // ahead of the session token.
        let fake = Arc::new(FakeXapi::new());
        let session = fake::session(&fake);
        session.login_with_password("root", "secret").await.unwrap();
        fake.script("VM.get_all", Ok(success(json!([]))));

        let vm = session.accessor("VM", vec![json!("bound")]);
        assert_eq!(vm.bound_args(), &[json!("bound")]);
        vm.call("get_all", vec![json!("arg")]).await.unwrap();

        let (_, params) = fake.calls().pop().unwrap();
        assert_eq!(
            params,
            vec![json!("bound"), json!("OpaqueRef:session-1"), json!("arg")]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_expiry_single_relogin() {
        let fake = Arc::new(FakeXapi::new());
        let session = Arc::new(fake::session(&fake));
        session.login_with_password("root", "secret").await.unwrap();
        fake.expire_session();

        let mut handles = vec![];
        for _ in 0..16 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                session.invoke("VM", "get_all", vec![]).await
            }));
        }

        let results = futures_util::future::join_all(handles).await;
        for result in results {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(logins(&fake), 2);
        assert_eq!(session.session_id().unwrap(), "OpaqueRef:session-2");
    }
}
