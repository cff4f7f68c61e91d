//! Shared fixtures for unit tests: a scripted transport and counting storage.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::net::{ApiRequest, ApiResponse, Method, Transport, TransportError};
use crate::session::Session;
use crate::storage::{KeyValueStorage, MemoryStorage, StorageError};
use crate::store::AUTHENTICATED_KEY;

pub const LOGIN_ROUTE: &str = "/auth/login";

// =============================================================================
// ScriptedTransport
// =============================================================================

enum Scripted {
    Respond(ApiResponse),
    Fail(String),
}

/// Transport answering from per-route queues. The last queued answer for a
/// route is sticky so concurrent callers can share it. Every send yields
/// once before answering so `join!`ed requests interleave. A held path
/// waits for [`ScriptedTransport::release`] before answering.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<ApiRequest>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Scripted::Respond(ApiResponse::new(status, body)));
    }

    pub fn fail(&self, method: Method, path: &str, reason: &str) {
        self.push(method, path, Scripted::Fail(reason.to_owned()));
    }

    fn push(&self, method: Method, path: &str, answer: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_owned()))
            .or_default()
            .push_back(answer);
    }

    /// Park requests to `path` until `release` is called.
    pub fn hold(&self, path: &str) {
        self.holds.lock().unwrap().insert(path.to_owned(), Arc::new(Notify::new()));
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = self.holds.lock().unwrap().remove(path) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    fn next_answer(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(&(request.method, request.path.clone())) else {
            return Ok(ApiResponse::new(404, json!({ "message": "no scripted route" })));
        };
        let answer = if queue.len() > 1 { queue.pop_front() } else { None };
        let answer = match &answer {
            Some(answer) => answer,
            None => queue.front().unwrap(),
        };
        match answer {
            Scripted::Respond(response) => Ok(response.clone()),
            Scripted::Fail(reason) => Err(TransportError(reason.clone())),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let gate = self.holds.lock().unwrap().get(&request.path).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        tokio::task::yield_now().await;
        self.next_answer(request)
    }
}

// =============================================================================
// CountingStorage
// =============================================================================

/// Memory storage that counts how often the session was cleared.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    clears: AtomicUsize,
}

impl CountingStorage {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl KeyValueStorage for CountingStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if key == AUTHENTICATED_KEY {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.remove_item(key)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn alice_json() -> Value {
    json!({ "id": 1, "name": "Alice", "email": "alice@example.com" })
}

pub fn login_success(roles: &[&str], permissions: &[&str]) -> Value {
    json!({
        "status": "success",
        "message": "Welcome back",
        "profile": alice_json(),
        "roles": roles.iter().map(|code| json!({ "code": code })).collect::<Vec<_>>(),
        "permissions": permissions.iter().map(|code| json!({ "code": code })).collect::<Vec<_>>(),
    })
}

pub fn profile_success(name: &str, roles: &[&str]) -> Value {
    json!({
        "status": "success",
        "data": { "id": 1, "name": name, "email": "alice@example.com" },
        "roles": roles.iter().map(|code| json!({ "id": 9, "code": code })).collect::<Vec<_>>(),
        "permissions": [],
    })
}

pub fn session_with(transport: &Arc<ScriptedTransport>) -> (Session, Arc<CountingStorage>) {
    let storage = Arc::new(CountingStorage::default());
    let session = Session::new(transport.clone(), storage.clone(), LOGIN_ROUTE);
    (session, storage)
}

/// Session that has completed a successful login with `roles`.
pub async fn signed_in_session(
    transport: &Arc<ScriptedTransport>,
    roles: &[&str],
) -> (Session, Arc<CountingStorage>) {
    transport.respond(
        Method::Post,
        crate::client::LOGIN_PATH,
        200,
        login_success(roles, &["reports.view"]),
    );
    let (session, storage) = session_with(transport);
    let outcome = session.login("alice@example.com", "secret").await;
    assert!(outcome.is_success(), "fixture login failed: {outcome:?}");
    (session, storage)
}
