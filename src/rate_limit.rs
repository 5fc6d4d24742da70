use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use tracing::{debug, warn};

use crate::{config::SecurityConfig, error::ErrorBody};

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Tracked clients before idle entries are swept.
pub const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Per client IP GCRA limiter: `threshold` requests per `window`.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiter: Arc<KeyedLimiter>,
    max_tracked: usize,
}

impl IpRateLimiter {
    pub fn new(threshold: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(threshold.max(1)).unwrap_or(NonZeroU32::MIN);
        let period = window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            max_tracked: MAX_TRACKED_CLIENTS,
        }
    }

    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked.max(1);
        self
    }

    pub fn from_config(cfg: &SecurityConfig) -> Self {
        Self::new(
            cfg.rate_limit_requests,
            Duration::from_secs(cfg.rate_limit_window_secs),
        )
    }

    /// `Err(wait)` when the key is over its quota.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        if self.limiter.len() >= self.max_tracked {
            self.prune();
        }
        self.limiter
            .check_key(&ip)
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    /// Drops clients whose quota has fully replenished.
    pub fn prune(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(before, after = self.limiter.len(), "rate limiter pruned");
    }

    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn rate_limited(retry_after: Duration) -> Response {
    let secs = retry_after.as_secs().max(1);
    let body = ErrorBody {
        success: false,
        code: "RATE_LIMITED",
        message: "Too many requests".to_string(),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(secs));
    response
}

pub async fn limit(
    State(limiter): State<IpRateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    match limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            warn!(%ip, retry_after_secs = wait.as_secs(), "rate limited");
            rate_limited(wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject_per_ip() {
        let limiter = IpRateLimiter::new(2, Duration::from_secs(60));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_ok());
        let wait = limiter.check(a).unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(30));

        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn idle_clients_are_pruned() {
        let limiter = IpRateLimiter::new(1, Duration::from_millis(50));
        for last in 1..=3u8 {
            assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))).is_ok());
        }
        assert_eq!(limiter.tracked(), 3);

        std::thread::sleep(Duration::from_millis(120));
        limiter.prune();
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn sweeps_when_table_is_full() {
        let limiter = IpRateLimiter::new(1, Duration::from_millis(50)).with_max_tracked(2);
        assert!(limiter.check("10.0.0.1".parse().unwrap()).is_ok());
        assert!(limiter.check("10.0.0.2".parse().unwrap()).is_ok());

        std::thread::sleep(Duration::from_millis(120));
        assert!(limiter.check("10.0.0.3".parse().unwrap()).is_ok());
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn rejection_carries_retry_after() {
        let res = rate_limited(Duration::from_millis(200));
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[RETRY_AFTER], "1");
    }
}
