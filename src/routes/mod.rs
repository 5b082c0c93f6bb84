//! HTTP delivery routes for Folio Server

pub mod documents;
pub mod health;
pub mod img;
pub mod info;
pub mod pdf;
pub mod prefetch;
pub mod session;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};

use crate::state::AppState;

/// Every delivery endpoint, with request counting
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config().storage.max_upload_bytes;

    Router::new()
        .merge(health::router())
        .merge(pdf::router())
        .merge(img::router())
        .merge(info::router())
        .merge(prefetch::router())
        .merge(documents::router(max_upload_bytes))
        .merge(session::router())
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.stats().record_request();
    next.run(request).await
}
