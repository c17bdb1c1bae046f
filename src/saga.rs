//! Registration saga.
//!
//! Registration spans the durable store and the notifier, which share no
//! transaction. The steps run in order and every outcome is recorded; when the
//! welcome notification cannot be delivered the persisted identity is deleted
//! again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::hash_password;
use crate::db::{Database, Invitation, NewUser, StoreError, User, hash_invitation_token};
use crate::identity::IdentityResolver;
use crate::mailer::{Mail, Notifier};

/// Role given to every new account.
pub const DEFAULT_ROLE: &str = "user";

/// Store operations the saga needs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_and_invite(
        &self,
        user: &NewUser,
        invitation: &Invitation,
    ) -> Result<User, StoreError>;
    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;
    async fn activate(&self, token_hash: &str) -> Result<i64, StoreError>;
}

#[async_trait]
impl AccountStore for Database {
    async fn create_and_invite(
        &self,
        user: &NewUser,
        invitation: &Invitation,
    ) -> Result<User, StoreError> {
        self.users().create_and_invite(user, invitation).await
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        self.users().delete(id).await
    }

    async fn activate(&self, token_hash: &str) -> Result<i64, StoreError> {
        self.users().activate(token_hash).await
    }
}

/// Bounded retry with linear backoff: the wait after attempt `n` is `backoff * n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Successful registration. `token` is the only copy of the plaintext
/// invitation the server ever hands out.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("a user with that email already exists")]
    DuplicateEmail,
    #[error("a user with that username already exists")]
    DuplicateUsername,
    #[error("welcome notification could not be delivered")]
    NotificationFailed,
    #[error("registration failed: {0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("invitation not found or expired")]
    NotFound,
    #[error(transparent)]
    Store(StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BuildIdentity,
    IssueInvitation,
    Persist,
    Notify { attempt: u32 },
    Compensate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

/// Ordered record of what a saga run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaTrace(Vec<(Step, Outcome)>);

impl SagaTrace {
    fn succeeded(&mut self, step: Step) {
        self.0.push((step, Outcome::Succeeded));
    }

    fn failed(&mut self, step: Step, reason: impl fmt::Display) {
        self.0.push((step, Outcome::Failed(reason.to_string())));
    }

    fn extend(&mut self, other: SagaTrace) {
        self.0.extend(other.0);
    }

    pub fn steps(&self) -> &[(Step, Outcome)] {
        &self.0
    }

    pub fn contains(&self, step: Step) -> bool {
        self.0.iter().any(|(s, _)| *s == step)
    }
}

pub struct SagaRun {
    pub trace: SagaTrace,
    pub result: Result<Registration, RegistrationError>,
}

pub struct RegistrationSaga {
    accounts: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    identities: IdentityResolver,
    retry: RetryPolicy,
    invitation_ttl: Duration,
    activation_base_url: String,
    sandbox: bool,
}

impl RegistrationSaga {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
        identities: IdentityResolver,
    ) -> Self {
        Self {
            accounts,
            notifier,
            identities,
            retry: RetryPolicy::default(),
            invitation_ttl: Duration::from_secs(3 * 24 * 60 * 60),
            activation_base_url: "http://localhost:5173".to_string(),
            sandbox: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_invitation_ttl(mut self, ttl: Duration) -> Self {
        self.invitation_ttl = ttl;
        self
    }

    /// Base URL of the frontend; activation links point at `<base>/confirm/<token>`.
    pub fn with_activation_base_url(mut self, base: &str) -> Self {
        self.activation_base_url = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    fn activation_url(&self, token: &str) -> String {
        format!("{}/confirm/{}", self.activation_base_url, token)
    }

    /// Run the saga to completion.
    pub async fn run(&self, request: RegistrationRequest) -> SagaRun {
        let mut trace = SagaTrace::default();
        let result = self.execute(request, &mut trace).await;

        match &result {
            Ok(registration) => {
                tracing::info!(user_id = registration.user.id, ?trace, "Registration completed")
            }
            Err(e) => tracing::warn!(error = %e, ?trace, "Registration failed"),
        }

        SagaRun { trace, result }
    }

    async fn execute(
        &self,
        request: RegistrationRequest,
        trace: &mut SagaTrace,
    ) -> Result<Registration, RegistrationError> {
        // Step 1: identity with hashed password
        let password = request.password;
        let password_hash = match tokio::task::spawn_blocking(move || hash_password(&password)).await
        {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => {
                trace.failed(Step::BuildIdentity, &e);
                return Err(RegistrationError::Internal(e.to_string()));
            }
            Err(e) => {
                trace.failed(Step::BuildIdentity, &e);
                return Err(RegistrationError::Internal(e.to_string()));
            }
        };
        let new_user = NewUser {
            username: request.username,
            email: request.email,
            password_hash,
            role: DEFAULT_ROLE.to_string(),
        };
        trace.succeeded(Step::BuildIdentity);

        // Step 2: invitation
        let (token, invitation) = Invitation::issue(self.invitation_ttl);
        trace.succeeded(Step::IssueInvitation);

        // Steps 3 to 5 run on their own task. Dropping the request future
        // (deadline, client gone) only detaches the JoinHandle, so a persisted
        // identity is always either notified or compensated.
        let settlement = Settlement {
            accounts: self.accounts.clone(),
            notifier: self.notifier.clone(),
            identities: self.identities.clone(),
            retry: self.retry,
            activation_url: self.activation_url(&token),
            sandbox: self.sandbox,
        };
        match tokio::spawn(settlement.run(new_user, invitation)).await {
            Ok((steps, result)) => {
                trace.extend(steps);
                result.map(|user| Registration { user, token })
            }
            Err(e) => {
                trace.failed(Step::Persist, &e);
                Err(RegistrationError::Internal(e.to_string()))
            }
        }
    }

    /// Consume a plaintext invitation token and activate its account.
    pub async fn activate(&self, token: &str) -> Result<i64, ActivationError> {
        let user_id = self
            .accounts
            .activate(&hash_invitation_token(token))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ActivationError::NotFound,
                other => ActivationError::Store(other),
            })?;

        self.identities.forget(user_id).await;
        tracing::info!(user_id, "Account activated");
        Ok(user_id)
    }
}

/// Persist, notify and compensate. Owns everything it touches so it can run
/// detached from the request that started it.
struct Settlement {
    accounts: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    identities: IdentityResolver,
    retry: RetryPolicy,
    activation_url: String,
    sandbox: bool,
}

impl Settlement {
    async fn run(
        self,
        new_user: NewUser,
        invitation: Invitation,
    ) -> (SagaTrace, Result<User, RegistrationError>) {
        let mut trace = SagaTrace::default();

        // Step 3: identity and invitation commit together
        let user = match self.accounts.create_and_invite(&new_user, &invitation).await {
            Ok(user) => user,
            Err(e) => {
                trace.failed(Step::Persist, &e);
                let err = match e {
                    StoreError::DuplicateEmail => RegistrationError::DuplicateEmail,
                    StoreError::DuplicateUsername => RegistrationError::DuplicateUsername,
                    other => RegistrationError::Internal(other.to_string()),
                };
                return (trace, Err(err));
            }
        };
        trace.succeeded(Step::Persist);

        // Step 4: welcome notification
        let mail = Mail::welcome(&user.username, &user.email, &self.activation_url, self.sandbox);
        if self.notify(&mail, &mut trace).await {
            return (trace, Ok(user));
        }

        // Step 5: compensation
        match self.accounts.delete_user(user.id).await {
            Ok(_) => {
                self.identities.forget(user.id).await;
                tracing::info!(user_id = user.id, "Registration rolled back");
                trace.succeeded(Step::Compensate);
            }
            Err(e) => {
                tracing::error!(user_id = user.id, error = %e, "Failed to roll back registration");
                trace.failed(Step::Compensate, &e);
            }
        }

        (trace, Err(RegistrationError::NotificationFailed))
    }

    /// Deliver with bounded retries. Returns whether any attempt succeeded.
    async fn notify(&self, mail: &Mail, trace: &mut SagaTrace) -> bool {
        for attempt in 1..=self.retry.max_attempts {
            match self.notifier.send(mail).await {
                Ok(status) => {
                    tracing::info!(status, attempt, "Welcome notification sent");
                    trace.succeeded(Step::Notify { attempt });
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Welcome notification failed");
                    trace.failed(Step::Notify { attempt }, &e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySource;
    use crate::mailer::MailError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Notifier double that fails a fixed number of times before succeeding.
    struct ScriptedNotifier {
        failures: u32,
        calls: AtomicU32,
        sent: Mutex<Vec<Mail>>,
    }

    impl ScriptedNotifier {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send(&self, mail: &Mail) -> Result<u16, MailError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(MailError::Transport("connection reset".to_string()));
            }
            self.sent.lock().unwrap().push(mail.clone());
            Ok(202)
        }
    }

    fn request(username: &str, email: &str) -> RegistrationRequest {
        RegistrationRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: "correct horse battery staple".to_string(),
        }
    }

    async fn saga(notifier: Arc<ScriptedNotifier>) -> (Database, RegistrationSaga) {
        let db = Database::open(":memory:").await.unwrap();
        let source: Arc<dyn IdentitySource> = Arc::new(db.clone());
        let saga = RegistrationSaga::new(
            Arc::new(db.clone()),
            notifier,
            IdentityResolver::new(source, None),
        )
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        })
        .with_activation_base_url("http://localhost:5173/");
        (db, saga)
    }

    #[test]
    fn test_linear_backoff() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_after(1), Duration::from_secs(1));
        assert_eq!(retry.delay_after(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_registration_stores_only_token_hash() {
        let notifier = Arc::new(ScriptedNotifier::failing(0));
        let (db, saga) = saga(notifier.clone()).await;

        let run = saga.run(request("alice", "alice@example.com")).await;
        let registration = run.result.unwrap();

        assert_eq!(registration.user.username, "alice");
        assert_eq!(registration.user.role.name, "user");
        assert!(!registration.user.activated);

        let stored: Vec<(String,)> = sqlx::query_as("SELECT token_hash FROM invitations")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].0, registration.token);
        assert_eq!(stored[0].0, hash_invitation_token(&registration.token));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(
            sent[0]
                .body
                .contains(&format!("http://localhost:5173/confirm/{}", registration.token))
        );
        assert!(sent[0].sandbox);
        assert!(!run.trace.contains(Step::Compensate));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let notifier = Arc::new(ScriptedNotifier::failing(2));
        let (_db, saga) = saga(notifier.clone()).await;

        let run = saga.run(request("bob", "bob@example.com")).await;
        assert!(run.result.is_ok());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            run.trace.steps().last(),
            Some(&(Step::Notify { attempt: 3 }, Outcome::Succeeded))
        );
    }

    #[tokio::test]
    async fn test_notification_exhaustion_compensates() {
        let notifier = Arc::new(ScriptedNotifier::failing(u32::MAX));
        let (db, saga) = saga(notifier.clone()).await;

        let run = saga.run(request("carol", "carol@example.com")).await;
        assert!(matches!(run.result, Err(RegistrationError::NotificationFailed)));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            run.trace.steps().last(),
            Some(&(Step::Compensate, Outcome::Succeeded))
        );

        let users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let invitations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM invitations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!((users.0, invitations.0), (0, 0));
    }

    #[tokio::test]
    async fn test_duplicate_email_stops_before_notify() {
        let notifier = Arc::new(ScriptedNotifier::failing(0));
        let (_db, saga) = saga(notifier.clone()).await;

        saga.run(request("dave", "dave@example.com")).await.result.unwrap();
        let run = saga.run(request("dave2", "DAVE@example.com")).await;

        assert!(matches!(run.result, Err(RegistrationError::DuplicateEmail)));
        assert!(!run.trace.contains(Step::Notify { attempt: 1 }));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activation_consumes_token() {
        let notifier = Arc::new(ScriptedNotifier::failing(0));
        let (db, saga) = saga(notifier).await;

        let registration = saga
            .run(request("erin", "erin@example.com"))
            .await
            .result
            .unwrap();

        assert_eq!(saga.activate(&registration.token).await.unwrap(), registration.user.id);
        assert!(
            db.users()
                .get_by_id(registration.user.id)
                .await
                .unwrap()
                .unwrap()
                .activated
        );
        assert!(matches!(
            saga.activate(&registration.token).await,
            Err(ActivationError::NotFound)
        ));
    }

    /// Notifier that signals each attempt, then stalls and fails.
    #[derive(Default)]
    struct StallingNotifier {
        called: tokio::sync::Notify,
    }

    #[async_trait]
    impl Notifier for StallingNotifier {
        async fn send(&self, _mail: &Mail) -> Result<u16, MailError> {
            self.called.notify_one();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(MailError::Rejected(503))
        }
    }

    #[tokio::test]
    async fn test_dropped_run_still_compensates() {
        let db = Database::open(":memory:").await.unwrap();
        let notifier = Arc::new(StallingNotifier::default());
        let source: Arc<dyn IdentitySource> = Arc::new(db.clone());
        let saga = RegistrationSaga::new(
            Arc::new(db.clone()),
            notifier.clone(),
            IdentityResolver::new(source, None),
        )
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        });

        // Drop the run once the identity is persisted and notification has begun
        tokio::select! {
            _ = saga.run(request("frank", "frank@example.com")) => {
                panic!("run finished before it could be abandoned")
            }
            _ = notifier.called.notified() => {}
        }

        let mut remaining = i64::MAX;
        for _ in 0..100 {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
                .fetch_one(db.pool())
                .await
                .unwrap();
            remaining = count.0;
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining, 0);
    }
}
