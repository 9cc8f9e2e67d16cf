//! Per-IP sliding-window rate limiting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize) -> Self {
        Self::with_window(limit, WINDOW)
    }

    fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admit or reject a request from `ip`, recording it when admitted.
    /// Admissions older than the window fall out as they age.
    pub fn try_admit(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();
        let entry = requests.entry(ip.to_string()).or_default();
        entry.retain(|at| now.duration_since(*at) < self.window);
        if entry.len() >= self.limit {
            return false;
        }
        entry.push(now);
        true
    }

    pub fn remaining(&self, ip: &str) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();
        let entry = requests.entry(ip.to_string()).or_default();
        entry.retain(|at| now.duration_since(*at) < self.window);
        self.limit.saturating_sub(entry.len())
    }
}

/// First `X-Forwarded-For` token, else `X-Real-IP`, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<&str>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|value| value.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.unwrap_or("unknown").to_string()
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let ip = client_ip(request.headers(), peer.as_deref());

    if !state.rate_limiter.try_admit(&ip) {
        let body = Json(json!({
            "error": "rate_limit_exceeded",
            "message": format!("Too many requests. Limit: {}/minute", state.rate_limiter.limit()),
            "retry_after_seconds": 60,
        }));
        return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    }

    next.run(request).await
}
