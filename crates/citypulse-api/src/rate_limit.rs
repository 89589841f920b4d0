//! Fixed-window rate limiter middleware.
//!
//! Counts requests per one-second window with atomics; requests beyond
//! the window's allowance are answered with 429.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ErrorBody;

#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    count: Arc<AtomicU64>,
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(now)
    }

    /// Admit one request in the window starting at epoch second `now`.
    fn try_acquire_at(&self, now: u64) -> bool {
        let current = self.window.load(Ordering::Relaxed);
        if now != current
            && self
                .window
                .compare_exchange(current, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.count.store(1, Ordering::Relaxed);
            return self.max_per_sec > 0;
        }
        self.count.fetch_add(1, Ordering::Relaxed) < self.max_per_sec
    }
}

pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        next.run(req).await
    } else {
        tracing::warn!(path = %req.uri().path(), "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody {
                error: "Too many requests. Please slow down.".to_string(),
            }),
        )
            .into_response()
    }
}
