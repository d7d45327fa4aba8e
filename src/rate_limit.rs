use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

pub const REQUESTS_PER_MINUTE: u32 = 60;
pub const TASK_REQUESTS_PER_MINUTE: u32 = 10;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub general_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    pub task_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_REQUESTS_PER_MINUTE).unwrap());
        Self {
            general_limiter: Arc::new(RateLimiter::direct(general_quota)),
            task_limiter: Arc::new(RateLimiter::direct(task_quota)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `POST /task` draws from the stricter task limiter; everything else
/// draws from the general limiter.
pub async fn rate_limit_middleware(
    axum::extract::State(config): axum::extract::State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let is_task_creation = request.uri().path() == "/task" && request.method() == "POST";
    let limiter = if is_task_creation { &config.task_limiter } else { &config.general_limiter };

    if limiter.check().is_err() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

pub fn extract_client_ip(request: &Request) -> String {
    if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
        if let Ok(ip_str) = forwarded_for.to_str() {
            if let Some(first_ip) = ip_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_config_allows_initial_requests() {
        let config = RateLimitConfig::new();
        assert!(config.general_limiter.check().is_ok());
        assert!(config.task_limiter.check().is_ok());
    }

    #[test]
    fn task_limiter_is_stricter_than_general() {
        let config = RateLimitConfig::new();
        for _ in 0..TASK_REQUESTS_PER_MINUTE {
            assert!(config.task_limiter.check().is_ok());
        }
        assert!(config.task_limiter.check().is_err());
    }
}
