//! In-memory management endpoint for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ConnectionTarget, Transport};
use crate::session::Session;
use crate::Result;

const USER: &str = "root";
const PASSWORD: &str = "secret";

/// A session talking to `fake`.
pub(crate) fn session(fake: &Arc<FakeXapi>) -> Session {
    let target = ConnectionTarget::parse("http://xen01.test/").unwrap();
    Session::with_transport(target, fake.clone())
}

pub(crate) fn success(value: Value) -> Value {
    json!({ "Status": "Success", "Value": value })
}

pub(crate) fn failure(description: &[&str]) -> Value {
    json!({ "Status": "Failure", "ErrorDescription": description })
}

pub(crate) fn session_invalid() -> Value {
    failure(&["SESSION_INVALID", "OpaqueRef:stale"])
}

#[derive(Default)]
struct State {
    valid_token: Option<String>,
    issued: u64,
    calls: Vec<(String, Vec<Value>)>,
    scripted: HashMap<String, VecDeque<Result<Value>>>,
}

/// Answers like a single-host pool: one pool, one master, API 2.21.
///
/// Scripted responses for a method are returned first, in order; after
/// that the built-in behavior applies.
#[derive(Default)]
pub(crate) struct FakeXapi {
    state: Mutex<State>,
}

impl FakeXapi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call of `method`.
    pub(crate) fn script(&self, method: &str, response: Result<Value>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Forget the current token, as a server restart would.
    pub(crate) fn expire_session(&self) {
        self.state.lock().unwrap().valid_token = None;
    }

    pub(crate) fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    fn answer(state: &mut State, method: &str, params: &[Value]) -> Value {
        match method {
            "session.login_with_password" | "session.slave_local_login_with_password" => {
                let user = params.first().and_then(Value::as_str).unwrap_or_default();
                let pass = params.get(1).and_then(Value::as_str).unwrap_or_default();
                if user != USER || pass != PASSWORD {
                    return failure(&[
                        "SESSION_AUTHENTICATION_FAILED",
                        user,
                        "Authentication failure",
                    ]);
                }
                state.issued += 1;
                let token = format!("OpaqueRef:session-{}", state.issued);
                state.valid_token = Some(token.clone());
                return success(json!(token));
            }
            _ => {}
        }

        let token = params.first().and_then(Value::as_str);
        if token.is_none() || token != state.valid_token.as_deref() {
            return session_invalid();
        }

        match method {
            "session.logout" | "session.local_logout" => {
                state.valid_token = None;
                success(json!(""))
            }
            "pool.get_all" => success(json!(["OpaqueRef:pool0"])),
            "pool.get_master" => success(json!("OpaqueRef:host0")),
            "host.get_API_version_major" => success(json!(2)),
            "host.get_API_version_minor" => success(json!(21)),
            "VM.get_all" => success(json!(["OpaqueRef:vm0", "OpaqueRef:vm1"])),
            "VM.clone" => success(json!("OpaqueRef:vm-clone")),
            other => failure(&["MESSAGE_METHOD_UNKNOWN", other]),
        }
    }
}

#[async_trait]
impl Transport for FakeXapi {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((method.to_string(), params.clone()));

        if let Some(response) = state.scripted.get_mut(method).and_then(VecDeque::pop_front) {
            return response;
        }

        Ok(Self::answer(&mut state, method, &params))
    }
}
