use axum::response::Redirect;

pub async fn home() -> Redirect {
    Redirect::to("/api-docs-json")
}
