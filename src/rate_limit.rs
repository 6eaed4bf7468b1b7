/// Request rate limiting
use crate::{
    config::RateLimitSettings,
    context::AppContext,
    error::{LinkError, LinkResult},
};
use axum::{
    extract::{Request, State},
    http::header::{AUTHORIZATION, COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn quota(rps: u32, fallback: NonZeroU32) -> Quota {
    let rate = NonZeroU32::new(rps).unwrap_or(fallback);
    Quota::per_second(rate).allow_burst(rate)
}

/// Two process-wide buckets: callers presenting a credential get the larger one
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            authenticated: Arc::new(GovernorLimiter::direct(quota(
                settings.authenticated_rps,
                NonZeroU32::MIN.saturating_add(99),
            ))),
            unauthenticated: Arc::new(GovernorLimiter::direct(quota(
                settings.unauthenticated_rps,
                NonZeroU32::MIN.saturating_add(9),
            ))),
        }
    }

    fn check(limiter: &DirectLimiter) -> LinkResult<()> {
        limiter.check().map_err(|_| LinkError::RateLimitExceeded {
            retry_after: Duration::from_secs(1),
        })
    }

    pub fn check_authenticated(&self) -> LinkResult<()> {
        if !self.enabled {
            return Ok(());
        }
        Self::check(&self.authenticated)
    }

    pub fn check_unauthenticated(&self) -> LinkResult<()> {
        if !self.enabled {
            return Ok(());
        }
        Self::check(&self.unauthenticated)
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let has_credential = request.headers().contains_key(AUTHORIZATION)
        || request
            .headers()
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains(crate::account::ACCESS_TOKEN_COOKIE))
            .unwrap_or(false);

    let result = if has_credential {
        ctx.rate_limiter.check_authenticated()
    } else {
        ctx.rate_limiter.check_unauthenticated()
    };

    match result {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), "rate limited");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool) -> RateLimitSettings {
        RateLimitSettings {
            enabled,
            authenticated_rps: 5,
            unauthenticated_rps: 2,
        }
    }

    #[test]
    fn test_burst_limit() {
        let limiter = RateLimiter::new(&settings(true));
        for _ in 0..2 {
            assert!(limiter.check_unauthenticated().is_ok());
        }
        assert!(matches!(
            limiter.check_unauthenticated(),
            Err(LinkError::RateLimitExceeded { .. })
        ));
        // Separate bucket
        assert!(limiter.check_authenticated().is_ok());
    }

    #[test]
    fn test_disabled_never_limits() {
        let limiter = RateLimiter::new(&settings(false));
        for _ in 0..100 {
            assert!(limiter.check_unauthenticated().is_ok());
        }
    }
}
