//! Fixed-window rate limiting by client address.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request fits in the current window.
    Allowed {
        /// Requests left in the window after this one.
        remaining: u32,
    },
    /// The window's budget is spent.
    Limited {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

/// Per-address request counters.
///
/// Counting for one address is atomic under the map's shard lock; other
/// addresses are not blocked.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    /// Allow `max_requests` per `window` per address.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: DashMap::new(),
        }
    }

    /// Count a request from `client`.
    pub fn check(&self, client: IpAddr) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> RateDecision {
        let mut window = self.clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(window.started);
            return RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drop windows that have expired.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.clients
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }

    /// Number of addresses with a live window.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Purge expired windows once per window length until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.window.max(Duration::from_secs(1)));
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.purge_expired();
                    tracing::trace!(clients = self.tracked_clients(), "Rate limit windows swept");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Peer address of the connection, or `0.0.0.0` when the server was not
/// started with connect info.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip())
}

/// Middleware rejecting over-limit clients with 429.
pub async fn limit_by_client(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);

    match limiter.check(client) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
            // Round up so clients never retry before the reset.
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn allows_up_to_ceiling_then_limits() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(
            limiter.check_at(CLIENT, now),
            RateDecision::Allowed { remaining: 2 }
        );
        assert_eq!(
            limiter.check_at(CLIENT, now),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at(CLIENT, now),
            RateDecision::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.check_at(CLIENT, now + Duration::from_secs(10)),
            RateDecision::Limited {
                retry_after: Duration::from_secs(50)
            }
        );
    }

    #[test]
    fn window_expiry_resets_budget() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at(CLIENT, now),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(CLIENT, now + Duration::from_secs(30)),
            RateDecision::Limited { .. }
        ));
        assert!(matches!(
            limiter.check_at(CLIENT, now + Duration::from_secs(60)),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn addresses_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at(CLIENT, now),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(OTHER, now),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(CLIENT, now),
            RateDecision::Limited { .. }
        ));
    }

    #[test]
    fn purge_drops_expired_windows() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check(CLIENT);
        assert_eq!(limiter.tracked_clients(), 1);

        std::thread::sleep(Duration::from_millis(20));
        limiter.purge_expired();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn concurrent_requests_never_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| matches!(limiter.check(CLIENT), RateDecision::Allowed { .. }))
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
