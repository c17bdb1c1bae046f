#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use hubgate::auth::BasicAuthConfig;
use hubgate::db::{Database, Invitation, NewUser, hash_invitation_token};
use hubgate::jwt::JwtConfig;
use hubgate::mailer::{Mail, MailError, Notifier};
use hubgate::saga::RetryPolicy;
use hubgate::{CacheConfig, MailConfig, ServerConfig, TokenConfig, create_app};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use url::Url;

pub const SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";
pub const ISSUER: &str = "hubgate-test";
pub const AUDIENCE: &str = "hubgate-test-clients";
pub const BASIC_USER: &str = "ops";
pub const BASIC_PASS: &str = "ops-password";

/// Notifier double that records messages, optionally failing or stalling.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    pub sent: Mutex<Vec<Mail>>,
    pub attempts: Mutex<u32>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Stall for `delay`, then fail every attempt.
    pub fn slow_failing(delay: Duration) -> Self {
        Self {
            fail: AtomicBool::new(true),
            delay: Mutex::new(Some(delay)),
            ..Default::default()
        }
    }

    /// Deliver immediately from now on.
    pub fn recover(&self) {
        self.fail.store(false, Ordering::SeqCst);
        *self.delay.lock().unwrap() = None;
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, mail: &Mail) -> Result<u16, MailError> {
        *self.attempts.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Rejected(503));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(202)
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: JwtConfig,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn jwt() -> JwtConfig {
    JwtConfig::new(SECRET, ISSUER, AUDIENCE, Duration::from_secs(3600))
}

/// Test configuration with admission control off and no retry backoff.
pub fn test_config(db: Database, notifier: Arc<RecordingNotifier>) -> ServerConfig {
    ServerConfig {
        db,
        token: TokenConfig {
            secret: SECRET.to_vec(),
            issuer: ISSUER.to_string(),
            audience: AUDIENCE.to_string(),
            expiry: Duration::from_secs(3600),
        },
        basic_auth: BasicAuthConfig::new(BASIC_USER, Some(BASIC_PASS)),
        cache: CacheConfig::default(),
        admission: None,
        mail: MailConfig {
            invitation_ttl: Duration::from_secs(600),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
        },
        frontend_url: Url::parse("http://localhost:5173").unwrap(),
        env: "test".to_string(),
        request_timeout: Duration::from_secs(30),
        notifier,
    }
}

pub async fn test_app() -> TestApp {
    test_app_with(RecordingNotifier::default(), |_| {}).await
}

/// Build an app, letting the caller adjust the configuration first.
pub async fn test_app_with(
    notifier: RecordingNotifier,
    configure: impl FnOnce(&mut ServerConfig),
) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let notifier = Arc::new(notifier);
    let mut config = test_config(db.clone(), notifier.clone());
    configure(&mut config);

    TestApp {
        app: create_app(&config),
        db,
        jwt: jwt(),
        notifier,
    }
}

/// Create an activated user with the given role and return its ID.
pub async fn create_user(db: &Database, username: &str, role: &str) -> i64 {
    let (plaintext, invitation) = Invitation::issue(Duration::from_secs(60));
    let user = db
        .users()
        .create_and_invite(
            &NewUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password_hash: hubgate::auth::hash_password("password123").unwrap(),
                role: "user".to_string(),
            },
            &invitation,
        )
        .await
        .unwrap();
    db.users()
        .activate(&hash_invitation_token(&plaintext))
        .await
        .unwrap();
    if role != "user" {
        assert!(db.users().set_role(user.id, role).await.unwrap());
    }
    user.id
}

pub fn bearer(jwt: &JwtConfig, user_id: i64) -> String {
    format!("Bearer {}", jwt.generate_token(user_id).unwrap().token)
}

/// Build a request with an optional `Authorization` header and JSON body.
pub fn request(
    method: &str,
    uri: &str,
    authorization: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Run a `SELECT COUNT(*)` query.
pub async fn count(db: &Database, sql: &'static str) -> i64 {
    let row: (i64,) = sqlx::query_as(sql)
        .fetch_one(db.pool())
        .await
        .unwrap();
    row.0
}

/// Poll a `SELECT COUNT(*)` query until it returns `expected`, for at most five seconds.
pub async fn wait_for_count(db: &Database, sql: &'static str, expected: i64) -> i64 {
    let mut current = count(db, sql).await;
    for _ in 0..100 {
        if current == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        current = count(db, sql).await;
    }
    current
}

/// Send a request and decode the JSON body (`Null` when empty).
pub async fn send(
    app: &Router,
    request: Request<Body>,
) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, headers, json)
}
