//! Request pacing for INSPIRE.
//!
//! INSPIRE publishes its limit as a fixed window ("15 requests per 5 seconds
//! per client"). [`RequestQuota`] mirrors that shape and maps it onto a
//! governor quota: one cell every `window / requests`, with the whole window
//! available as a burst. Each 429 halves the requests allowed per window;
//! every quiet minute gives one halving back.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use super::SearchError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Deepest throttle: 1/16 of the base quota.
const MAX_THROTTLE: u32 = 4;
/// Quiet time after which one throttle level is released.
const RECOVERY_STEP: Duration = Duration::from_secs(60);
/// Retry-After value assumed when the server sends an HTTP date.
const DATE_RETRY_AFTER: Duration = Duration::from_secs(5);

/// `requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestQuota {
    pub requests: u32,
    pub window: Duration,
}

impl RequestQuota {
    pub const INSPIRE: Self = Self {
        requests: 15,
        window: Duration::from_secs(5),
    };

    /// The quota after `level` halvings. Never below one request per window.
    pub fn throttled(&self, level: u32) -> Self {
        Self {
            requests: (self.requests >> level.min(31)).max(1),
            window: self.window,
        }
    }

    fn governor_quota(&self) -> Quota {
        let requests = self.requests.max(1);
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        let spacing = (self.window / requests).max(Duration::from_millis(1));
        Quota::with_period(spacing)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

impl Default for RequestQuota {
    fn default() -> Self {
        Self::INSPIRE
    }
}

#[derive(Debug)]
struct Throttle {
    level: u32,
    changed_at: Option<Instant>,
}

/// Window-quota limiter that backs off on 429s.
pub struct QuotaLimiter {
    base: RequestQuota,
    limiter: ArcSwap<DirectLimiter>,
    throttle: Mutex<Throttle>,
}

impl QuotaLimiter {
    pub fn new(base: RequestQuota) -> Self {
        Self {
            base,
            limiter: ArcSwap::from(Arc::new(DirectLimiter::direct(base.governor_quota()))),
            throttle: Mutex::new(Throttle {
                level: 0,
                changed_at: None,
            }),
        }
    }

    /// Wait for a request slot.
    pub async fn acquire(&self) {
        self.recover(Instant::now());
        let limiter = self.limiter.load_full();
        limiter.until_ready().await;
    }

    /// Record a 429 and tighten the quota one level.
    pub fn on_rate_limited(&self) {
        self.tighten(Instant::now());
    }

    /// Quota currently enforced.
    pub fn current(&self) -> RequestQuota {
        self.base.throttled(self.lock().level)
    }

    fn tighten(&self, now: Instant) {
        let mut throttle = self.lock();
        throttle.changed_at = Some(now);
        if throttle.level < MAX_THROTTLE {
            throttle.level += 1;
            self.install(throttle.level);
            tracing::debug!(
                requests = self.base.throttled(throttle.level).requests,
                window_secs = self.base.window.as_secs(),
                "search quota tightened"
            );
        }
    }

    fn recover(&self, now: Instant) {
        let mut throttle = self.lock();
        let Some(changed_at) = throttle.changed_at else {
            return;
        };
        let steps = now.saturating_duration_since(changed_at).as_secs()
            / RECOVERY_STEP.as_secs().max(1);
        if steps == 0 || throttle.level == 0 {
            return;
        }
        throttle.level = throttle.level.saturating_sub(steps.min(u32::MAX as u64) as u32);
        throttle.changed_at = (throttle.level > 0).then_some(now);
        self.install(throttle.level);
    }

    fn install(&self, level: u32) {
        let quota = self.base.throttled(level).governor_quota();
        self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Throttle> {
        self.throttle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Turn a 429 response into [`SearchError::RateLimited`].
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SearchError> {
    if resp.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Ok(());
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    Err(SearchError::RateLimited { retry_after })
}

/// Seconds, or an HTTP date (answered with a fixed short wait).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if value.ends_with("GMT") {
        return Some(DATE_RETRY_AFTER);
    }
    None
}

/// Sleep before the single retry of a rate-limited request: `retry_after`
/// (one quota window if absent) capped at `timeout`, plus up to 250 ms jitter.
pub fn retry_wait(retry_after: Option<Duration>, window: Duration, timeout: Duration) -> Duration {
    let base = retry_after.unwrap_or(window).min(timeout);
    base + Duration::from_millis(fastrand::u64(0..250))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, retry_after: Option<&str>) -> reqwest::Response {
        let mut builder = http::Response::builder().status(status);
        if let Some(v) = retry_after {
            builder = builder.header("retry-after", v);
        }
        reqwest::Response::from(builder.body("").unwrap())
    }

    #[test]
    fn inspire_quota_spacing_and_burst() {
        let quota = RequestQuota::INSPIRE.governor_quota();
        assert_eq!(quota.burst_size().get(), 15);
        assert_eq!(quota.replenish_interval(), Duration::from_millis(333) + Duration::from_nanos(333_333));
    }

    #[test]
    fn throttled_halves_down_to_one() {
        let q = RequestQuota::INSPIRE;
        assert_eq!(q.throttled(0).requests, 15);
        assert_eq!(q.throttled(1).requests, 7);
        assert_eq!(q.throttled(3).requests, 1);
        assert_eq!(q.throttled(40).requests, 1);
        assert_eq!(q.throttled(2).window, Duration::from_secs(5));
    }

    #[test]
    fn tighten_stops_at_max_level() {
        let limiter = QuotaLimiter::new(RequestQuota {
            requests: 64,
            window: Duration::from_secs(5),
        });
        let now = Instant::now();
        limiter.tighten(now);
        assert_eq!(limiter.current().requests, 32);
        for _ in 0..10 {
            limiter.tighten(now);
        }
        assert_eq!(limiter.current().requests, 64 >> MAX_THROTTLE);
    }

    #[test]
    fn recovery_releases_one_level_per_quiet_minute() {
        let limiter = QuotaLimiter::new(RequestQuota::INSPIRE);
        let start = Instant::now();
        limiter.tighten(start);
        limiter.tighten(start);
        assert_eq!(limiter.current().requests, 3);

        limiter.recover(start + Duration::from_secs(30));
        assert_eq!(limiter.current().requests, 3);
        limiter.recover(start + Duration::from_secs(61));
        assert_eq!(limiter.current().requests, 7);
        limiter.recover(start + Duration::from_secs(200));
        assert_eq!(limiter.current(), RequestQuota::INSPIRE);
    }

    #[test]
    fn new_429_restarts_recovery_clock() {
        let limiter = QuotaLimiter::new(RequestQuota::INSPIRE);
        let start = Instant::now();
        limiter.tighten(start);
        limiter.tighten(start + Duration::from_secs(50));
        limiter.recover(start + Duration::from_secs(70));
        assert_eq!(limiter.current().requests, 3);
    }

    #[tokio::test]
    async fn burst_is_available_immediately() {
        let limiter = QuotaLimiter::new(RequestQuota::INSPIRE);
        let started = std::time::Instant::now();
        for _ in 0..15 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn retry_after_forms() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(DATE_RETRY_AFTER)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn only_429_is_rate_limited() {
        assert!(check_rate_limit_response(&response(200, None)).is_ok());
        assert!(check_rate_limit_response(&response(503, Some("10"))).is_ok());
        assert_eq!(
            check_rate_limit_response(&response(429, Some("10"))).unwrap_err(),
            SearchError::RateLimited {
                retry_after: Some(Duration::from_secs(10))
            }
        );
        assert_eq!(
            check_rate_limit_response(&response(429, None)).unwrap_err(),
            SearchError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn retry_wait_defaults_to_window_and_caps_at_timeout() {
        let window = Duration::from_secs(5);
        let wait = retry_wait(None, window, Duration::from_secs(15));
        assert!(wait >= window && wait < window + Duration::from_millis(250));

        let wait = retry_wait(Some(Duration::from_secs(120)), window, Duration::from_secs(10));
        assert!(wait >= Duration::from_secs(10) && wait < Duration::from_millis(10_250));
    }
}
