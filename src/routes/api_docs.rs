use axum::extract::State;
use axum::Json;
use utoipa::openapi::server::Server;
use utoipa::OpenApi;

use super::newsletter::SubscribeRequest;
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Newsletter API",
        version = "1.0.0",
        description = "API for newsletter sign up and management"
    ),
    paths(
        super::newsletter::subscribe,
        super::newsletter::unsubscribe,
        super::newsletter::check
    ),
    components(schemas(SubscribeRequest))
)]
pub struct ApiDoc;

pub async fn api_docs_json(state: State<AppState>) -> Json<utoipa::openapi::OpenApi> {
    let mut api = ApiDoc::openapi();
    api.servers = Some(vec![Server::new(state.application_base_url.as_str())]);
    Json(api)
}
