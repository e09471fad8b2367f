//! End-to-end auth flows through the router, backed by the in-memory stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use axum::Router;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, Request, Response, StatusCode};
use fixit_api::config::ApiConfig;
use fixit_api::{AppState, router};
use uuid::Uuid;
use fixit_core::auth::memory::{MemoryTokenStore, MemoryUserDirectory};
use fixit_core::auth::password::hash_password;
use fixit_core::auth::AuthError;
use fixit_core::auth::store::UserDirectory;
use fixit_core::models::auth::{
    AccountStatus, NewUser, Principal, Role, UserAccount, UserWithPassword,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const PASSWORD: &str = "correct horse battery";

struct TestApp {
    router: Router,
    users: Arc<MemoryUserDirectory>,
}

impl TestApp {
    fn new() -> Self {
        let users = Arc::new(MemoryUserDirectory::new());
        Self::with_directory(users.clone(), users)
    }

    /// Serve through `directory`, which must be backed by `users`.
    fn with_directory(users: Arc<MemoryUserDirectory>, directory: Arc<dyn UserDirectory>) -> Self {
        let mut config = ApiConfig::with_secret("integration-test-secret");
        config.auth.bcrypt_cost = 4;
        let state = AppState::new(Arc::new(MemoryTokenStore::new()), directory, config);
        Self {
            router: router(state),
            users,
        }
    }

    async fn seed_user(&self, email: &str, role: Role, status: AccountStatus) -> UserAccount {
        self.users
            .create_user(NewUser {
                email: email.into(),
                name: None,
                password_hash: hash_password(PASSWORD, 4).expect("hash"),
                role,
                status,
            })
            .await
            .expect("seed user")
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        cookies: &Cookies,
        body: Option<Value>,
    ) -> Response<Body> {
        match body {
            Some(json) => {
                self.send_raw(method, uri, cookies, Some("application/json"), json.to_string())
                    .await
            }
            None => self.send_raw(method, uri, cookies, None, String::new()).await,
        }
    }

    async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        cookies: &Cookies,
        content_type: Option<&str>,
        body: String,
    ) -> Response<Body> {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(header) = cookies.header() {
            req = req.header(COOKIE, header);
        }
        if let Some(content_type) = content_type {
            req = req.header(CONTENT_TYPE, content_type);
        }
        self.router
            .clone()
            .oneshot(req.body(Body::from(body)).expect("request"))
            .await
            .expect("response")
    }

    async fn login(&self, email: &str) -> Response<Body> {
        self.send(
            Method::POST,
            "/auth/login",
            &Cookies::default(),
            Some(json!({ "email": email, "password": PASSWORD })),
        )
        .await
    }
}

/// Minimal client-side cookie jar.
#[derive(Default, Clone)]
struct Cookies(HashMap<String, String>);

impl Cookies {
    fn from_response(resp: &Response<Body>) -> Self {
        let mut jar = Self::default();
        jar.absorb(resp);
        jar
    }

    fn absorb(&mut self, resp: &Response<Body>) {
        for value in resp.headers().get_all(SET_COOKIE) {
            let raw = value.to_str().expect("ascii cookie");
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                if value.is_empty() {
                    self.0.remove(name.trim());
                } else {
                    self.0.insert(name.trim().to_string(), value.to_string());
                }
            }
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn header(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

async fn json_body(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn register(app: &TestApp, email: &str) -> (Value, Cookies) {
    let resp = app
        .send(
            Method::POST,
            "/auth/register",
            &Cookies::default(),
            Some(json!({ "email": email, "password": PASSWORD, "name": "Alice" })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let cookies = Cookies::from_response(&resp);
    (json_body(resp).await, cookies)
}

#[tokio::test]
async fn health_reports_version() {
    let app = TestApp::new();
    let resp = app
        .send(Method::GET, "/health", &Cookies::default(), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], fixit_core::version());
}

#[tokio::test]
async fn register_sets_both_cookies_and_returns_user() {
    let app = TestApp::new();
    let resp = app
        .send(
            Method::POST,
            "/auth/register",
            &Cookies::default(),
            Some(json!({ "email": "alice@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let set_cookies: Vec<String> = resp
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().expect("ascii").to_string())
        .collect();
    assert_eq!(set_cookies.len(), 2);
    assert!(
        set_cookies
            .iter()
            .any(|c| c.starts_with("fixit_access=") && c.contains("HttpOnly"))
    );
    assert!(
        set_cookies
            .iter()
            .any(|c| c.starts_with("fixit_refresh=") && c.contains("Path=/auth"))
    );

    let body = json_body(resp).await;
    assert!(body["user"]["userId"].is_string());
    assert_eq!(body["user"]["role"], "tenant");
    assert_eq!(body["expiresIn"], 1200);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::new();
    register(&app, "alice@example.com").await;
    let resp = app
        .send(
            Method::POST,
            "/auth/register",
            &Cookies::default(),
            Some(json!({ "email": "ALICE@example.com", "password": PASSWORD })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn wrong_password_is_401_without_cookies() {
    let app = TestApp::new();
    register(&app, "alice@example.com").await;

    let resp = app
        .send(
            Method::POST,
            "/auth/login",
            &Cookies::default(),
            Some(json!({ "email": "alice@example.com", "password": "not the password" })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn suspended_login_is_403_without_cookies() {
    let app = TestApp::new();
    app.seed_user("sam@example.com", Role::Tenant, AccountStatus::Suspended)
        .await;

    let resp = app.login("sam@example.com").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp.headers().get(SET_COOKIE).is_none());
    let body = json_body(resp).await;
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|m| m.contains("suspended")),
        "unexpected body: {body}"
    );
}

#[tokio::test]
async fn replayed_refresh_cookie_revokes_all_sessions() {
    let app = TestApp::new();
    let (_, original) = register(&app, "alice@example.com").await;

    let first = app
        .send(Method::POST, "/auth/refresh", &original, None)
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let rotated = Cookies::from_response(&first);
    assert_ne!(rotated.get("fixit_refresh"), original.get("fixit_refresh"));
    assert_ne!(rotated.get("fixit_access"), None);

    let replay = app
        .send(Method::POST, "/auth/refresh", &original, None)
        .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    let mut cleared = original.clone();
    cleared.absorb(&replay);
    assert_eq!(cleared.get("fixit_refresh"), None);

    // The legitimately rotated token died with its family.
    let after = app
        .send(Method::POST, "/auth/refresh", &rotated, None)
        .await;
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);

    let sessions = app
        .send(Method::GET, "/auth/sessions", &rotated, None)
        .await;
    assert_eq!(sessions.status(), StatusCode::OK);
    let body = json_body(sessions).await;
    assert_eq!(body["sessions"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn refresh_without_cookie_is_401() {
    let app = TestApp::new();
    let resp = app
        .send(Method::POST, "/auth/refresh", &Cookies::default(), None)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_rejects_old_access_token_immediately() {
    let app = TestApp::new();
    let (_, cookies) = register(&app, "alice@example.com").await;

    let me = app.send(Method::GET, "/auth/me", &cookies, None).await;
    assert_eq!(me.status(), StatusCode::OK);
    let body = json_body(me).await;
    assert_eq!(body["user"]["email"], "alice@example.com");

    let logout = app.send(Method::POST, "/auth/logout", &cookies, None).await;
    assert_eq!(logout.status(), StatusCode::OK);
    assert_eq!(json_body(logout).await["success"], true);

    let me = app.send(Method::GET, "/auth/me", &cookies, None).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    let refresh = app
        .send(Method::POST, "/auth/refresh", &cookies, None)
        .await;
    assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_without_credentials_still_succeeds() {
    let app = TestApp::new();
    let resp = app
        .send(Method::POST, "/auth/logout", &Cookies::default(), None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn suspension_blocks_live_access_token() {
    let app = TestApp::new();
    let (body, cookies) = register(&app, "alice@example.com").await;
    let user_id = body["user"]["userId"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("user id");

    app.users
        .set_status(user_id, AccountStatus::Suspended)
        .await
        .expect("set status");

    let me = app.send(Method::GET, "/auth/me", &cookies, None).await;
    assert_eq!(me.status(), StatusCode::FORBIDDEN);

    app.users
        .set_status(user_id, AccountStatus::Active)
        .await
        .expect("set status");
    let me = app.send(Method::GET, "/auth/me", &cookies, None).await;
    assert_eq!(me.status(), StatusCode::OK);
}

#[tokio::test]
async fn staff_gate_rejects_landlord_and_admits_staff() {
    let app = TestApp::new();
    let (body, tenant_cookies) = register(&app, "alice@example.com").await;
    let tenant_id = body["user"]["userId"].as_str().expect("user id").to_string();
    let uri = format!("/admin/users/{tenant_id}/status");

    app.seed_user("lee@example.com", Role::Landlord, AccountStatus::Active)
        .await;
    app.seed_user("sue@example.com", Role::Staff, AccountStatus::Active)
        .await;
    let landlord = Cookies::from_response(&app.login("lee@example.com").await);
    let staff = Cookies::from_response(&app.login("sue@example.com").await);

    let denied = app
        .send(
            Method::PATCH,
            &uri,
            &landlord,
            Some(json!({ "status": "suspended" })),
        )
        .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let allowed = app
        .send(
            Method::PATCH,
            &uri,
            &staff,
            Some(json!({ "status": "suspended" })),
        )
        .await;
    assert_eq!(allowed.status(), StatusCode::OK);
    let body = json_body(allowed).await;
    assert_eq!(body["previousStatus"], "active");
    assert_eq!(body["status"], "suspended");

    // The tenant's refresh tokens went with the status change.
    let refresh = app
        .send(Method::POST, "/auth/refresh", &tenant_cookies, None)
        .await;
    assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);

    let audit = app.send(Method::GET, "/admin/audit", &staff, None).await;
    assert_eq!(audit.status(), StatusCode::OK);
    let entries = json_body(audit).await["entries"].clone();
    assert!(
        entries
            .as_array()
            .is_some_and(|e| e.iter().any(|x| x["action"] == "status-change"))
    );

    let audit = app.send(Method::GET, "/admin/audit", &landlord, None).await;
    assert_eq!(audit.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_status_value_is_400() {
    let app = TestApp::new();
    let (body, _) = register(&app, "alice@example.com").await;
    let tenant_id = body["user"]["userId"].as_str().expect("user id").to_string();
    app.seed_user("sue@example.com", Role::Staff, AccountStatus::Active)
        .await;
    let staff = Cookies::from_response(&app.login("sue@example.com").await);

    let resp = app
        .send(
            Method::PATCH,
            &format!("/admin/users/{tenant_id}/status"),
            &staff,
            Some(json!({ "status": "banished" })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sessions_can_be_listed_and_revoked_individually() {
    let app = TestApp::new();
    let (_, laptop) = register(&app, "alice@example.com").await;
    let phone = Cookies::from_response(&app.login("alice@example.com").await);

    let list = app.send(Method::GET, "/auth/sessions", &laptop, None).await;
    let body = json_body(list).await;
    let sessions = body["sessions"].as_array().cloned().unwrap_or_default();
    assert_eq!(sessions.len(), 2);

    // Newest first: the phone login.
    let phone_family = sessions[0]["familyId"].as_str().expect("family id").to_string();
    let resp = app
        .send(
            Method::DELETE,
            &format!("/auth/sessions/{phone_family}"),
            &laptop,
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let refresh = app.send(Method::POST, "/auth/refresh", &phone, None).await;
    assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);
    let refresh = app.send(Method::POST, "/auth/refresh", &laptop, None).await;
    assert_eq!(refresh.status(), StatusCode::OK);

    let again = app
        .send(
            Method::DELETE,
            &format!("/auth/sessions/{phone_family}"),
            &laptop,
            None,
        )
        .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let app = TestApp::new();
    let (_, laptop) = register(&app, "alice@example.com").await;
    let phone = Cookies::from_response(&app.login("alice@example.com").await);

    let resp = app
        .send(Method::POST, "/auth/logout-all", &laptop, None)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["revokedTokens"], 2);

    for cookies in [&laptop, &phone] {
        let refresh = app
            .send(Method::POST, "/auth/refresh", cookies, None)
            .await;
        assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);
    }
    let me = app.send(Method::GET, "/auth/me", &laptop, None).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}

/// Directory whose next account lookup fails once, like a dropped connection.
struct FlakyDirectory {
    inner: Arc<MemoryUserDirectory>,
    fail_next_lookup: AtomicBool,
}

#[async_trait]
impl UserDirectory for FlakyDirectory {
    async fn principal(&self, user_id: Uuid) -> Result<Option<Principal>, AuthError> {
        Ok(self.find_by_id(user_id).await?.map(|u| u.principal()))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserAccount>, AuthError> {
        if self.fail_next_lookup.swap(false, Ordering::SeqCst) {
            return Err(AuthError::DbError(sqlx::Error::PoolTimedOut));
        }
        self.inner.find_by_id(user_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, AuthError> {
        self.inner.find_by_email(email).await
    }

    async fn create_user(&self, user: NewUser) -> Result<UserAccount, AuthError> {
        self.inner.create_user(user).await
    }

    async fn set_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
    ) -> Result<Option<AccountStatus>, AuthError> {
        self.inner.set_status(user_id, status).await
    }
}

#[tokio::test]
async fn failed_refresh_keeps_the_presented_token_usable() {
    let users = Arc::new(MemoryUserDirectory::new());
    let directory = Arc::new(FlakyDirectory {
        inner: users.clone(),
        fail_next_lookup: AtomicBool::new(false),
    });
    let app = TestApp::with_directory(users, directory.clone());
    let (_, cookies) = register(&app, "alice@example.com").await;

    directory.fail_next_lookup.store(true, Ordering::SeqCst);
    let failed = app.send(Method::POST, "/auth/refresh", &cookies, None).await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(failed.headers().get(SET_COOKIE).is_none());

    // The client retries with the only refresh cookie it holds.
    let retried = app.send(Method::POST, "/auth/refresh", &cookies, None).await;
    assert_eq!(retried.status(), StatusCode::OK);
    let rotated = Cookies::from_response(&retried);
    assert_ne!(rotated.get("fixit_refresh"), cookies.get("fixit_refresh"));
    assert_eq!(json_body(retried).await["user"]["email"], "alice@example.com");

    let again = app.send(Method::POST, "/auth/refresh", &rotated, None).await;
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_bodies_are_400() {
    let app = TestApp::new();

    let wrong_type = app
        .send(
            Method::POST,
            "/auth/login",
            &Cookies::default(),
            Some(json!({ "email": 42, "password": PASSWORD })),
        )
        .await;
    assert_eq!(wrong_type.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(wrong_type).await["error"], "validation_error");

    let no_content_type = app
        .send_raw(
            Method::POST,
            "/auth/register",
            &Cookies::default(),
            None,
            json!({ "email": "alice@example.com", "password": PASSWORD }).to_string(),
        )
        .await;
    assert_eq!(no_content_type.status(), StatusCode::BAD_REQUEST);

    let broken_json = app
        .send_raw(
            Method::POST,
            "/auth/login",
            &Cookies::default(),
            Some("application/json"),
            "{\"email\":".into(),
        )
        .await;
    assert_eq!(broken_json.status(), StatusCode::BAD_REQUEST);
    assert!(broken_json.headers().get(SET_COOKIE).is_none());
}
