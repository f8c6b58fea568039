use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::configuration::RateLimitSettings;
use crate::AppState;

/// Caps the request rate of every client address.
///
/// The quota refills continuously: a client may burst up to `max_requests`
/// and then regains one request every `window / max_requests`.
pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    trust_proxy: bool,
    rejection_message: String,
}

impl ClientRateLimiter {
    pub fn new(settings: &RateLimitSettings, trust_proxy: bool) -> anyhow::Result<Self> {
        let burst = NonZeroU32::new(settings.max_requests)
            .context("rate_limit.max_requests must be greater than zero")?;
        let quota = Quota::with_period(settings.window() / burst.get())
            .context("rate_limit.window_seconds must be greater than zero")?
            .allow_burst(burst);
        let minutes = settings.window_seconds.div_ceil(60);

        Ok(Self {
            limiter: RateLimiter::keyed(quota),
            trust_proxy,
            rejection_message: format!(
                "Too many requests from this IP, please try again after {minutes} minutes"
            ),
        })
    }

    /// The peer address, or the hop recorded by the trusted proxy in front
    /// of us.
    pub fn client_address(&self, headers: &HeaderMap, peer: IpAddr) -> IpAddr {
        if !self.trust_proxy {
            return peer;
        }
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.rsplit(',').next())
            .and_then(|hop| hop.trim().parse().ok())
            .unwrap_or(peer)
    }

    pub fn check(&self, client: IpAddr) -> bool {
        self.limiter.check_key(&client).is_ok()
    }

    pub fn evict_idle_clients(&self) {
        self.limiter.retain_recent();
    }

    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }
}

pub async fn limit_requests(
    state: State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.rate_limiter.as_deref() else {
        return next.run(request).await;
    };
    let client = limiter.client_address(request.headers(), peer.ip());
    if limiter.check(client) {
        next.run(request).await
    } else {
        tracing::warn!(%client, "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            limiter.rejection_message().to_owned(),
        )
            .into_response()
    }
}

/// Periodically forgets clients whose quota has fully refilled. Runs until
/// the task is aborted, which `Application` does once the server stops.
pub async fn run_eviction_until_stopped(limiter: Arc<ClientRateLimiter>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        limiter.evict_idle_clients();
    }
}
