use std::sync::Arc;

use rate_limit::ClientRateLimiter;
use subscription_service::SubscriptionService;

pub mod configuration;
pub mod domain;
pub mod rate_limit;
pub mod routes;
pub mod startup;
pub mod store;
pub mod subscription_service;
pub mod telemetry;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub subscription_service: SubscriptionService,
    pub rate_limiter: Option<Arc<ClientRateLimiter>>,
    pub application_base_url: Arc<String>,
}
