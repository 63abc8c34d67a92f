//! The session: connection target plus authentication state.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::state::{ApiVersion, AuthState, LoginMethod};
use crate::config::Config;
use crate::error::XenApiError;
use crate::proxy::{Dispatcher, DEFAULT_RETRY_ATTEMPTS};
use crate::transport::{ConnectionTarget, HttpOptions, HttpProxy, HttpTransport, Transport};
use crate::Result;

/// An authenticated (or not yet authenticated) connection to the
/// management API.
///
/// Remote methods are reached through [`Session::namespace`] or the
/// generic [`Session::call`]. The session token is injected into every
/// call and refreshed by replaying the last login when the server
/// reports it expired.
///
/// A `Session` can be shared between tasks behind an `Arc`. Re-logins
/// are serialised, so a burst of expired-session answers leads to one
/// replay.
pub struct Session {
    target: ConnectionTarget,
    transport: Arc<dyn Transport>,
    state: RwLock<AuthState>,
    login_gate: Mutex<()>,
    retry_attempts: u32,
}

impl Session {
    /// Connect to `uri` over HTTP(S), optionally through a proxy.
    ///
    /// No request is made until the first call.
    pub fn new(uri: &str, proxy: Option<HttpProxy>) -> Result<Self> {
        Self::with_options(
            uri,
            &HttpOptions {
                proxy,
                ..HttpOptions::default()
            },
        )
    }

    /// Connect to `uri` with explicit HTTP options.
    pub fn with_options(uri: &str, options: &HttpOptions) -> Result<Self> {
        let target = ConnectionTarget::parse(uri)?;
        let transport = HttpTransport::new(&target, options)?;
        Ok(Self::with_transport(target, Arc::new(transport)))
    }

    /// Build a session from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::with_options(&config.connection.url, &config.http_options())?
            .with_retry_attempts(config.session.retry_attempts))
    }

    /// Use a custom transport for `target`.
    pub fn with_transport(target: ConnectionTarget, transport: Arc<dyn Transport>) -> Self {
        Self {
            target,
            transport,
            state: RwLock::new(AuthState::new()),
            login_gate: Mutex::new(()),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    /// Change how many attempts a call gets when its session keeps
    /// expiring. At least one attempt is always made.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Current session token; empty when not logged in.
    pub fn session_id(&self) -> Result<String> {
        self.read(|state| state.token().to_string())
    }

    /// API version negotiated at login, `1.1` before that.
    pub fn api_version(&self) -> Result<ApiVersion> {
        self.read(AuthState::api_version)
    }

    /// Login variant that produced the current token.
    pub fn last_login_method(&self) -> Result<Option<LoginMethod>> {
        self.read(|state| state.last_login().map(|l| l.method))
    }

    pub fn is_authenticated(&self) -> Result<bool> {
        self.read(AuthState::is_authenticated)
    }

    /// Snapshot of the authentication state.
    pub fn auth_state(&self) -> Result<AuthState> {
        self.read(|state| state.clone())
    }

    /// Use a token obtained outside this session.
    ///
    /// There is no login to replay for it, so once the server expires it
    /// calls fail with [`XenApiError::AuthenticationRequired`].
    pub fn adopt_session_id(&self, token: impl Into<String>) -> Result<()> {
        self.write(|state| state.adopt(token.into()))
    }

    /// `session.login_with_password`
    pub async fn login_with_password(&self, username: &str, password: &str) -> Result<()> {
        self.login(
            LoginMethod::LoginWithPassword,
            vec![Value::from(username), Value::from(password)],
        )
        .await
    }

    /// `session.slave_local_login_with_password`, for talking to a pool
    /// member directly while the master is unreachable.
    pub async fn slave_local_login_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<()> {
        self.login(
            LoginMethod::SlaveLocalLoginWithPassword,
            vec![Value::from(username), Value::from(password)],
        )
        .await
    }

    /// Log in with any login variant and its full argument list.
    ///
    /// On success the token, the login (for replay) and the server's API
    /// version are stored.
    pub async fn login(&self, method: LoginMethod, args: Vec<Value>) -> Result<()> {
        let _gate = self.login_gate.lock().await;
        self.perform_login(method, args).await
    }

    /// End the session with `session.logout`, or `session.local_logout`
    /// after a local login. The session state is reset even if the
    /// call fails.
    pub async fn logout(&self) -> Result<()> {
        let method = self
            .last_login_method()?
            .map_or("logout", |login| login.logout_method());
        info!(method, "logging out");
        self.namespace("session").call(method, Vec::new()).await?;
        Ok(())
    }

    /// Dispatcher for the `class.` namespace, e.g. `namespace("VM")`.
    pub fn namespace(&self, class: &str) -> Dispatcher<'_> {
        self.accessor(class, Vec::new())
    }

    /// Dispatcher for the `name.` namespace with `bound` placed ahead of
    /// every call's arguments, as an XML-RPC proxy would.
    ///
    /// This is what an unqualified name resolves to: the name becomes
    /// the namespace.
    pub fn accessor(&self, name: &str, bound: Vec<Value>) -> Dispatcher<'_> {
        Dispatcher::new(self, format!("{}.", name), bound)
    }

    /// Call `class.method` with `args`.
    pub async fn invoke(&self, class: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        self.namespace(class).call(method, args).await
    }

    /// Call a remote method by its dotted name, e.g. `VM.start`.
    ///
    /// The bare names of the login variants and `logout` run the session
    /// operations of the same name; a login returns the new token.
    /// Other names without a namespace are rejected.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name.split_once('.') {
            Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                self.invoke(class, method, args).await
            }
            Some(_) => Err(XenApiError::InvalidMethod(name.into())),
            None => {
                if let Some(login) = LoginMethod::from_name(name) {
                    self.login(login, args).await?;
                    Ok(Value::String(self.session_id()?))
                } else if name == "logout" {
                    self.logout().await?;
                    Ok(Value::Null)
                } else {
                    Err(XenApiError::InvalidMethod(name.into()))
                }
            }
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn has_replayable_login(&self) -> Result<bool> {
        self.read(|state| state.last_login().is_some())
    }

    /// Replay the last login after a call made with `stale_token` was
    /// rejected.
    ///
    /// If another task already replaced the token while this one waited
    /// for the gate, nothing is sent.
    pub(crate) async fn replay_login(&self, stale_token: &str) -> Result<()> {
        let _gate = self.login_gate.lock().await;

        let pending = self.read(|state| {
            if state.is_authenticated() && state.token() != stale_token {
                return Ok(None);
            }
            state
                .last_login()
                .cloned()
                .map(Some)
                .ok_or(XenApiError::AuthenticationRequired)
        })??;

        match pending {
            Some(last) => {
                info!(method = %last.method, "replaying login");
                self.perform_login(last.method, last.args).await
            }
            None => {
                debug!("session already refreshed by a concurrent call");
                Ok(())
            }
        }
    }

    /// Reset to the unauthenticated state. Runs from drop guards, so a
    /// poisoned lock is recovered rather than reported.
    pub(crate) fn clear_auth(&self) {
        match self.state.write() {
            Ok(mut state) => state.reset(),
            Err(poisoned) => poisoned.into_inner().reset(),
        }
    }

    /// Caller must hold the login gate.
    async fn perform_login(&self, method: LoginMethod, args: Vec<Value>) -> Result<()> {
        let token = self
            .namespace("session")
            .call_login(method, args.clone())
            .await?;

        let token = match token {
            Value::String(token) if !token.is_empty() => token,
            other => {
                return Err(XenApiError::Protocol(format!(
                    "{} returned no session reference: {}",
                    method, other
                )))
            }
        };

        self.write(|state| state.record_login(token, method, args))?;

        let version = self.probe_api_version().await?;
        self.write(|state| state.set_api_version(version))?;
        info!(%method, api_version = %version, "logged in");
        Ok(())
    }

    /// Ask the pool master which API version it speaks.
    async fn probe_api_version(&self) -> Result<ApiVersion> {
        let pool = self.namespace("pool");
        let host = self.namespace("host");

        let pools = pool.call_once("get_all", Vec::new()).await?;
        let first = pools
            .as_array()
            .and_then(|pools| pools.first())
            .cloned()
            .ok_or_else(|| {
                XenApiError::Protocol(format!("pool.get_all returned no pool: {}", pools))
            })?;

        let master = pool.call_once("get_master", vec![first]).await?;
        let major = host
            .call_once("get_API_version_major", vec![master.clone()])
            .await?;
        let minor = host.call_once("get_API_version_minor", vec![master]).await?;

        ApiVersion::from_values(&major, &minor)
    }

    fn read<R>(&self, f: impl FnOnce(&AuthState) -> R) -> Result<R> {
        let state = self.state.read().map_err(|_| XenApiError::LockPoisoned)?;
        Ok(f(&state))
    }

    fn write<R>(&self, f: impl FnOnce(&mut AuthState) -> R) -> Result<R> {
        let mut state = self.state.write().map_err(|_| XenApiError::LockPoisoned)?;
        Ok(f(&mut state))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("authenticated", &self.is_authenticated().unwrap_or(false))
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}
