//! Admission control.
//!
//! Every request is checked against a per-client policy before any
//! authentication work happens. The policy is chosen at startup.

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Key used when the peer address is unavailable.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub permitted: bool,
    /// How long the client should wait before retrying (zero when permitted)
    pub retry_after: Duration,
}

impl Admission {
    fn permit() -> Self {
        Self {
            permitted: true,
            retry_after: Duration::ZERO,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            permitted: false,
            retry_after,
        }
    }
}

/// A rate-limiting strategy keyed by client.
pub trait AdmissionPolicy: Send + Sync {
    fn allow(&self, client_key: &str) -> Admission;

    /// Drop state for clients that have gone quiet.
    fn sweep(&self) {}
}

/// At most `limit` requests per client in each window of `frame`.
pub struct FixedWindowPolicy {
    limit: u32,
    frame: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl FixedWindowPolicy {
    pub fn new(limit: NonZeroU32, frame: Duration) -> Self {
        Self {
            limit: limit.get(),
            frame,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl AdmissionPolicy for FixedWindowPolicy {
    fn allow(&self, client_key: &str) -> Admission {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let (start, count) = windows
            .entry(client_key.to_string())
            .or_insert((now, 0));

        if now.duration_since(*start) >= self.frame {
            *start = now;
            *count = 0;
        }

        if *count < self.limit {
            *count += 1;
            Admission::permit()
        } else {
            Admission::deny(self.frame.saturating_sub(now.duration_since(*start)))
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, (start, _)| now.duration_since(*start) < self.frame);
    }
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Token bucket: bursts up to `limit`, refilling one token every `frame / limit`.
pub struct TokenBucketPolicy {
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

impl TokenBucketPolicy {
    pub fn new(limit: NonZeroU32, frame: Duration) -> Option<Self> {
        let quota = Quota::with_period(frame / limit.get())?.allow_burst(limit);
        Some(Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        })
    }
}

impl AdmissionPolicy for TokenBucketPolicy {
    fn allow(&self, client_key: &str) -> Admission {
        match self.limiter.check_key(&client_key.to_string()) {
            Ok(()) => Admission::permit(),
            Err(not_until) => Admission::deny(not_until.wait_time_from(self.clock.now())),
        }
    }

    fn sweep(&self) {
        self.limiter.retain_recent();
    }
}

/// Which policy to build at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RateLimitPolicyKind {
    #[default]
    FixedWindow,
    TokenBucket,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests: u32,
    pub time_frame: Duration,
    pub policy: RateLimitPolicyKind,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 20,
            time_frame: Duration::from_secs(5),
            policy: RateLimitPolicyKind::FixedWindow,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitConfigError {
    #[error("rate limit request count must be at least 1")]
    ZeroRequests,
    #[error("rate limit time frame is too short for {0} requests")]
    FrameTooShort(u32),
}

/// Build the configured policy, or `None` when admission control is disabled.
pub fn build_policy(
    config: &RateLimitConfig,
) -> Result<Option<Arc<dyn AdmissionPolicy>>, RateLimitConfigError> {
    if !config.enabled {
        return Ok(None);
    }

    let limit = NonZeroU32::new(config.requests).ok_or(RateLimitConfigError::ZeroRequests)?;
    if config.time_frame.is_zero() {
        return Err(RateLimitConfigError::FrameTooShort(config.requests));
    }

    let policy: Arc<dyn AdmissionPolicy> = match config.policy {
        RateLimitPolicyKind::FixedWindow => Arc::new(FixedWindowPolicy::new(limit, config.time_frame)),
        RateLimitPolicyKind::TokenBucket => Arc::new(
            TokenBucketPolicy::new(limit, config.time_frame)
                .ok_or(RateLimitConfigError::FrameTooShort(config.requests))?,
        ),
    };
    Ok(Some(policy))
}

/// Whole seconds for a `Retry-After` header, rounded up.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Middleware consulting the admission policy before anything else runs.
pub async fn admission_control(
    State(policy): State<Arc<dyn AdmissionPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    let admission = policy.allow(&key);

    if admission.permitted {
        return next.run(request).await;
    }

    #[derive(Serialize)]
    struct ErrorResponse {
        error: String,
    }

    let secs = retry_after_secs(admission.retry_after);
    tracing::warn!(
        client = %key,
        method = %request.method(),
        path = %request.uri().path(),
        retry_after = secs,
        "Rate limit exceeded"
    );

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse {
            error: format!("rate limit exceeded, retry after: {}s", secs),
        }),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}
