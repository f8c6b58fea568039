use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::subscription_service::{SubscriptionError, SubscriptionStatus};
use crate::AppState;

#[derive(Deserialize, ToSchema)]
pub struct SubscribeRequest {
    #[serde(default)]
    #[schema(example = "user@example.com")]
    pub email: Option<String>,
}

impl IntoResponse for SubscriptionError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::ValidationError(_) | Self::AlreadySubscribed => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::StoreError(_) => {
                tracing::error!(error.cause_chain = ?self, "Subscriber store failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Sign up for the newsletter.
#[utoipa::path(
    post,
    path = "/newsletter",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Successfully signed up."),
        (status = 400, description = "Email already subscribed."),
    ),
    tag = "newsletter"
)]
#[tracing::instrument(name = "Subscribe request", skip(state, payload))]
pub async fn subscribe(
    state: State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Response, SubscriptionError> {
    let Json(request) =
        payload.map_err(|rejection| SubscriptionError::ValidationError(rejection.body_text()))?;
    state.subscription_service.subscribe(request.email).await?;
    Ok((StatusCode::OK, "Successfully signed up.").into_response())
}

/// Unsubscribe from the newsletter.
#[utoipa::path(
    delete,
    path = "/newsletter/{email}",
    params(("email" = String, Path, description = "The subscribed email address")),
    responses(
        (status = 200, description = "Successfully unsubscribed."),
        (status = 404, description = "Email not found."),
    ),
    tag = "newsletter"
)]
#[tracing::instrument(name = "Unsubscribe request", skip(state))]
pub async fn unsubscribe(
    state: State<AppState>,
    Path(email): Path<String>,
) -> Result<Response, SubscriptionError> {
    state.subscription_service.unsubscribe(email).await?;
    Ok((StatusCode::OK, "Successfully unsubscribed.").into_response())
}

/// Check if an email is subscribed to the newsletter.
#[utoipa::path(
    get,
    path = "/newsletter/{email}",
    params(("email" = String, Path, description = "The email address to look up")),
    responses(
        (status = 200, description = "Email is subscribed."),
        (status = 404, description = "Email not subscribed."),
    ),
    tag = "newsletter"
)]
#[tracing::instrument(name = "Subscription check request", skip(state))]
pub async fn check(
    state: State<AppState>,
    Path(email): Path<String>,
) -> Result<Response, SubscriptionError> {
    let response = match state.subscription_service.check(email).await? {
        SubscriptionStatus::Subscribed => (StatusCode::OK, "Email is subscribed."),
        SubscriptionStatus::NotSubscribed => (StatusCode::NOT_FOUND, "Email not subscribed."),
    };
    Ok(response.into_response())
}
