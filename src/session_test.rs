use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use super::*;
use crate::client::{LOGIN_PATH, LOGOUT_PATH, PROFILE_PATH};
use crate::net::Method;
use crate::storage::MemoryStorage;
use crate::test_helpers::{
    LOGIN_ROUTE, ScriptedTransport, alice_json, login_success, profile_success, session_with,
    signed_in_session,
};

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
        }
    }
}

fn navigations(events: &[SessionEvent]) -> Vec<NavigationIntent> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Navigate(intent) => Some(intent.clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// login / register
// =============================================================================

#[tokio::test]
async fn login_as_admin_answers_role_predicates() {
    let transport = ScriptedTransport::new();
    let (session, _) = signed_in_session(&transport, &["admin"]).await;

    assert!(session.is_logged_in());
    assert!(session.has_role("admin"));
    assert!(!session.has_role("editor"));
    assert!(session.has_any_role(&["editor", "admin"]));
    assert!(!session.has_all_roles(&["editor", "admin"]));
    assert!(session.has_permission("reports.view"));
    assert_eq!(session.phase(), SessionPhase::Authenticated);
    assert!(!session.is_loading());
    assert_eq!(session.error(), None);
    assert_eq!(session.user_name(), "Alice");
    assert_eq!(session.user_email(), "alice@example.com");
}

#[tokio::test]
async fn login_emits_authenticated() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGIN_PATH, 200, login_success(&[], &[]));
    let (session, _) = session_with(&transport);
    let mut rx = session.subscribe();

    session.login("alice@example.com", "secret").await;
    assert_eq!(drain(&mut rx), vec![SessionEvent::Authenticated]);
}

#[tokio::test]
async fn failed_login_sets_error_and_stays_anonymous() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGIN_PATH, 401, json!({ "message": "Invalid credentials" }));
    let (session, storage) = session_with(&transport);

    let outcome = session.login("alice@example.com", "wrong").await;
    assert!(!outcome.is_success());
    assert_eq!(session.error().as_deref(), Some("Invalid credentials"));
    assert_eq!(session.phase(), SessionPhase::Anonymous);
    assert!(!session.is_loading());
    assert!(!session.is_logged_in());
    assert_eq!(storage.clears(), 0);
}

#[tokio::test]
async fn server_failure_during_login_uses_fallback_message() {
    let transport = ScriptedTransport::new();
    transport.fail(Method::Post, LOGIN_PATH, "connection refused");
    let (session, _) = session_with(&transport);

    let outcome = session.login("alice@example.com", "secret").await;
    assert_eq!(outcome.message(), Some(LOGIN_FAILED));
    assert_eq!(session.error().as_deref(), Some(LOGIN_FAILED));
}

#[tokio::test]
async fn clear_error_resets_message() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGIN_PATH, 401, json!({ "message": "Invalid credentials" }));
    let (session, _) = session_with(&transport);
    session.login("alice@example.com", "wrong").await;

    session.clear_error();
    assert_eq!(session.error(), None);
}

#[tokio::test]
async fn register_signs_in_without_roles() {
    let transport = ScriptedTransport::new();
    transport.respond(
        Method::Post,
        crate::client::REGISTER_PATH,
        200,
        json!({ "status": "success", "data": alice_json() }),
    );
    let (session, _) = session_with(&transport);

    let outcome = session.register(&json!({ "name": "Alice" })).await;
    assert!(outcome.is_success());
    assert!(session.is_logged_in());
    assert!(session.state().snapshot.roles.is_empty());
}

#[tokio::test]
async fn update_profile_keeps_roles() {
    let transport = ScriptedTransport::new();
    let (session, _) = signed_in_session(&transport, &["admin"]).await;
    transport.respond(
        Method::Post,
        "/users/update-profile/1",
        200,
        json!({ "status": "success", "data": { "id": 1, "name": "Alice B." } }),
    );

    let outcome = session.update_profile(&json!({ "name": "Alice B." })).await;
    assert!(outcome.is_success());
    assert_eq!(session.user_name(), "Alice B.");
    assert!(session.has_role("admin"));
}

#[tokio::test]
async fn update_profile_without_user_reports_error() {
    let transport = ScriptedTransport::new();
    let (session, _) = session_with(&transport);

    let outcome = session.update_profile(&json!({})).await;
    assert_eq!(outcome.message(), Some("No user is signed in"));
    assert_eq!(session.error().as_deref(), Some("No user is signed in"));
}

// =============================================================================
// logout
// =============================================================================

#[tokio::test]
async fn logout_resets_state_and_emits_logged_out() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGOUT_PATH, 200, json!({ "status": "success" }));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;
    let mut rx = session.subscribe();

    session.logout().await;
    assert_eq!(session.state(), SessionState::default());
    assert!(!session.has_role("admin"));
    assert_eq!(storage.clears(), 1);
    assert_eq!(drain(&mut rx), vec![SessionEvent::LoggedOut]);
}

#[tokio::test]
async fn concurrent_logouts_run_one_cycle() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGOUT_PATH, 200, json!({ "status": "success" }));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;

    tokio::join!(session.logout(), session.logout());
    assert_eq!(transport.call_count(LOGOUT_PATH), 1);
    assert_eq!(storage.clears(), 1);
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn logout_clears_locally_when_server_unreachable() {
    let transport = ScriptedTransport::new();
    transport.fail(Method::Post, LOGOUT_PATH, "connection refused");
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;

    session.logout().await;
    assert!(!session.is_logged_in());
    assert_eq!(storage.clears(), 1);
    assert!(!session.store().is_flagged().unwrap());
}

#[tokio::test]
async fn logout_rejected_with_401_runs_one_cycle() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGOUT_PATH, 401, json!({}));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;
    let mut rx = session.subscribe();

    session.logout().await;
    assert_eq!(storage.clears(), 1);
    assert_eq!(drain(&mut rx), vec![SessionEvent::LoggedOut]);
}

#[tokio::test]
async fn latch_is_released_after_logout() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGOUT_PATH, 200, json!({ "status": "success" }));
    let (session, _) = signed_in_session(&transport, &["admin"]).await;

    session.logout().await;
    session.logout().await;
    assert_eq!(transport.call_count(LOGOUT_PATH), 2);
}

// =============================================================================
// forced invalidation
// =============================================================================

#[tokio::test]
async fn concurrent_401s_run_exactly_one_invalidation() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, "/reports", 401, json!({ "message": "expired" }));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;
    session.record_location("/reports");
    let mut rx = session.subscribe();

    let (a, b, c) = tokio::join!(
        session.request(ApiRequest::get("/reports")),
        session.request(ApiRequest::get("/reports")),
        session.request(ApiRequest::get("/reports")),
    );
    for result in [a, b, c] {
        assert!(matches!(result, Err(SessionError::Unauthorized)));
    }

    let events = drain(&mut rx);
    let intents = navigations(&events);
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].redirect.as_deref(), Some("/reports"));
    assert_eq!(intents[0].location(), "/auth/login?redirect=%2Freports");
    assert_eq!(events.iter().filter(|e| **e == SessionEvent::Invalidated).count(), 1);

    assert_eq!(session.phase(), SessionPhase::Anonymous);
    assert_eq!(storage.clears(), 1);
    assert!(!session.store().is_flagged().unwrap());
}

#[tokio::test]
async fn no_navigation_when_already_on_login_route() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, PROFILE_PATH, 401, json!({}));
    let (session, storage) = signed_in_session(&transport, &[]).await;
    session.record_location("/auth/login?redirect=%2F");
    let mut rx = session.subscribe();

    assert_eq!(session.get_profile().await.unwrap(), None);
    assert_eq!(drain(&mut rx), vec![SessionEvent::Invalidated]);
    assert_eq!(storage.clears(), 1);
}

#[tokio::test]
async fn profile_401_resolves_to_none() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, PROFILE_PATH, 401, json!({}));
    let (session, _) = signed_in_session(&transport, &["admin"]).await;

    assert_eq!(session.fetch_user().await.unwrap(), None);
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn profile_refresh_replaces_roles() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, PROFILE_PATH, 200, profile_success("Alice", &["editor"]));
    let (session, _) = signed_in_session(&transport, &["admin"]).await;
    let mut rx = session.subscribe();

    let user = session.get_profile().await.unwrap().unwrap();
    assert_eq!(user.display_name(), "Alice");
    assert!(session.has_role("editor"));
    assert!(!session.has_role("admin"));
    // Already authenticated: no second Authenticated event.
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn profile_server_error_is_returned() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, PROFILE_PATH, 500, json!({ "message": "boom" }));
    let (session, _) = signed_in_session(&transport, &["admin"]).await;

    let err = session.get_profile().await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(session.is_logged_in());
}

#[tokio::test]
async fn force_logout_releases_latch() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, LOGOUT_PATH, 200, json!({ "status": "success" }));
    let (session, _) = signed_in_session(&transport, &["admin"]).await;

    session.force_logout();
    assert!(!session.is_logged_in());
    assert!(transport.calls().iter().all(|call| call.path != LOGOUT_PATH));

    session.logout().await;
    assert_eq!(transport.call_count(LOGOUT_PATH), 1);
}

#[tokio::test]
async fn force_logout_without_location_navigates_without_redirect() {
    let transport = ScriptedTransport::new();
    let (session, _) = session_with(&transport);
    let mut rx = session.subscribe();

    session.force_logout();
    let intents = navigations(&drain(&mut rx));
    assert_eq!(intents, vec![NavigationIntent { route: LOGIN_ROUTE.into(), redirect: None }]);
    assert_eq!(intents[0].location(), LOGIN_ROUTE);
}

#[tokio::test]
async fn new_session_after_invalidation_accepts_fresh_401() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, "/reports", 401, json!({}));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;

    assert!(session.request(ApiRequest::get("/reports")).await.is_err());
    transport.respond(Method::Post, LOGIN_PATH, 200, login_success(&["admin"], &[]));
    assert!(session.login("alice@example.com", "secret").await.is_success());
    assert!(session.request(ApiRequest::get("/reports")).await.is_err());

    assert_eq!(storage.clears(), 2);
    assert!(!session.is_logged_in());
}

#[tokio::test]
async fn stale_401_after_relogin_keeps_new_session() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Get, "/reports", 401, json!({ "message": "expired" }));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;
    transport.hold("/reports");

    let in_flight = tokio::spawn({
        let session = session.clone();
        async move { session.request(ApiRequest::get("/reports")).await }
    });
    while transport.call_count("/reports") == 0 {
        tokio::task::yield_now().await;
    }

    assert!(session.login("alice@example.com", "secret").await.is_success());
    transport.release("/reports");

    assert!(matches!(in_flight.await.unwrap(), Err(SessionError::Unauthorized)));
    assert!(session.is_logged_in());
    assert!(session.has_role("admin"));
    assert_eq!(storage.clears(), 0);
    assert!(session.store().is_flagged().unwrap());
}

#[tokio::test]
async fn update_profile_401_leaves_error_unset() {
    let transport = ScriptedTransport::new();
    transport.respond(Method::Post, "/users/update-profile/1", 401, json!({}));
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;
    let mut rx = session.subscribe();

    let outcome = session.update_profile(&json!({ "name": "Alice B." })).await;
    assert!(!outcome.is_success());
    assert_eq!(session.error(), None);
    assert!(!session.is_logged_in());
    assert!(!session.is_loading());
    assert_eq!(storage.clears(), 1);
    assert_eq!(navigations(&drain(&mut rx)).len(), 1);
}

#[tokio::test]
async fn register_over_previous_session_reloads_without_old_roles() {
    let transport = ScriptedTransport::new();
    let (session, storage) = signed_in_session(&transport, &["admin"]).await;
    transport.respond(
        Method::Post,
        crate::client::REGISTER_PATH,
        200,
        json!({ "status": "success", "data": { "id": 2, "name": "Bob" } }),
    );

    assert!(session.register(&json!({ "name": "Bob" })).await.is_success());
    assert!(!session.has_role("admin"));

    let reloaded = Session::new(transport.clone(), storage.clone(), LOGIN_ROUTE);
    assert_eq!(reloaded.initialize_auth(), SessionPhase::Authenticated);
    assert_eq!(reloaded.user_name(), "Bob");
    assert!(!reloaded.has_role("admin"));
    assert!(!reloaded.has_permission("reports.view"));
}

#[tokio::test]
async fn pending_navigations_reads_past_lag() {
    let transport = ScriptedTransport::new();
    let (session, _) = session_with(&transport);
    let mut rx = session.subscribe();

    for _ in 0..EVENT_CAPACITY {
        session.force_logout();
    }
    let intents = pending_navigations(&mut rx);
    assert!(!intents.is_empty());
    assert!(intents.iter().all(|intent| intent.route == LOGIN_ROUTE));
}

// =============================================================================
// initialize_auth
// =============================================================================

#[tokio::test]
async fn initialize_adopts_valid_store() {
    let transport = ScriptedTransport::new();
    let storage = Arc::new(MemoryStorage::new());
    let store = CredentialStore::new(storage.clone());
    let user: UserProfile = serde_json::from_value(alice_json()).unwrap();
    store.save(&SessionSnapshot::signed_in(user, ["admin".to_owned()], [])).unwrap();

    let session = Session::new(transport.clone(), storage, LOGIN_ROUTE);
    let mut rx = session.subscribe();
    assert_eq!(session.initialize_auth(), SessionPhase::Authenticated);
    assert!(session.has_role("admin"));
    assert_eq!(drain(&mut rx), vec![SessionEvent::Authenticated]);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn initialize_with_flag_but_no_user_forces_logout() {
    let transport = ScriptedTransport::new();
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("isAuthenticated", "true").unwrap();
    storage.set_item("roles", r#"["admin"]"#).unwrap();

    let session = Session::new(transport.clone(), storage.clone(), LOGIN_ROUTE);
    let mut rx = session.subscribe();
    assert_eq!(session.initialize_auth(), SessionPhase::Anonymous);
    assert!(storage.is_empty());
    assert!(!session.has_role("admin"));
    assert_eq!(navigations(&drain(&mut rx)).len(), 1);
}

#[tokio::test]
async fn initialize_with_corrupt_user_forces_logout() {
    let transport = ScriptedTransport::new();
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("isAuthenticated", "true").unwrap();
    storage.set_item("user", "{broken").unwrap();

    let session = Session::new(transport.clone(), storage.clone(), LOGIN_ROUTE);
    assert_eq!(session.initialize_auth(), SessionPhase::Anonymous);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn initialize_without_flag_wipes_leftovers() {
    let transport = ScriptedTransport::new();
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("user", &alice_json().to_string()).unwrap();

    let session = Session::new(transport.clone(), storage.clone(), LOGIN_ROUTE);
    let mut rx = session.subscribe();
    assert_eq!(session.initialize_auth(), SessionPhase::Anonymous);
    assert!(storage.is_empty());
    assert!(drain(&mut rx).is_empty());
}
