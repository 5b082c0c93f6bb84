//! Viewing session endpoints
//!
//! `POST /view/:id` picks the delivery strategy for a document and hands the
//! client absolute URLs for it. Later navigation goes through
//! `PATCH /session/:sid`, which keeps the prefetch window following the
//! reader in image mode.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::normalize_rotation;
use crate::error::{DeliveryError, DeliveryResult};
use crate::prefetch::PrefetchRequest;
use crate::registry::RegisteredDocument;
use crate::render::ImageFormat;
use crate::routes::img::{MAX_WIDTH, MIN_WIDTH};
use crate::routes::info::forced_mode;
use crate::session::{DeliverySession, SessionUpdate};
use crate::state::AppState;
use crate::strategy::DeliveryStrategy;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/view/:id", post(start_view))
        .route("/session/:sid", patch(update_session).delete(end_session))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewRequest {
    pub mode: Option<String>,
    pub zoom: Option<f32>,
    pub rotation: Option<i64>,
    pub page: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryUrls {
    pub pdf: String,
    pub info: String,
    /// `{page}` is replaced by the client
    pub image_template: String,
    pub prefetch: String,
    pub session: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse {
    pub session: DeliverySession,
    pub file_size: u64,
    /// Known only in image mode, where the server opens the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub urls: DeliveryUrls,
}

/// CSS width for a zoom factor
fn zoomed_width(default_width: u32, zoom: f32) -> u32 {
    ((default_width as f32) * zoom).round().clamp(MIN_WIDTH as f32, MAX_WIDTH as f32) as u32
}

fn parse_session_id(raw: &str) -> DeliveryResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| DeliveryError::NotFound(format!("Session {} not found", raw)))
}

fn delivery_urls(base: &str, document_id: &str, session_id: Uuid, width: u32, rotation: u16) -> DeliveryUrls {
    DeliveryUrls {
        pdf: format!("{}/pdf/{}", base, document_id),
        info: format!("{}/info/{}", base, document_id),
        image_template: format!(
            "{}/img/{}/{{page}}?w={}&rotation={}",
            base, document_id, width, rotation
        ),
        prefetch: format!("{}/prefetch/{}", base, document_id),
        session: format!("{}/session/{}", base, session_id),
    }
}

fn prefetch_request(state: &AppState, document: &RegisteredDocument, session: &DeliverySession) -> PrefetchRequest {
    let render = &state.config().render;
    PrefetchRequest {
        document_id: document.id.clone(),
        path: document.path.clone(),
        current_page: session.page,
        range: state.config().prefetch.range,
        width: zoomed_width(render.default_width, session.zoom),
        dpr: render.default_dpr,
        rotation: i64::from(session.rotation),
        format: ImageFormat::Png,
    }
}

async fn start_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ViewRequest>>,
) -> DeliveryResult<(StatusCode, Json<ViewResponse>)> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let document = state.registry().get(&id)?;
    let forced = forced_mode(request.mode.as_deref())?;

    let file_size = tokio::fs::metadata(&document.path)
        .await
        .map(|m| m.len())
        .map_err(|_| DeliveryError::NotFound(format!("File for document {} is missing", id)))?;
    let strategy = state.selector().select(file_size, forced);

    let mut session = DeliverySession::new(&document.id, strategy);
    session.page = request.page.unwrap_or(0);
    if let Some(zoom) = request.zoom.filter(|z| z.is_finite() && *z > 0.0) {
        session.zoom = zoom.min(10.0);
    }
    session.rotation = normalize_rotation(request.rotation.unwrap_or(0));

    let page_count = if strategy == DeliveryStrategy::Image {
        let count = state.renderer().page_count(&document.path).await?;
        state.prefetch().submit(prefetch_request(&state, &document, &session));
        Some(count)
    } else {
        None
    };

    let width = zoomed_width(state.config().render.default_width, session.zoom);
    let session = state.sessions().create(session).await;
    let urls = delivery_urls(
        &state.config().server.public_url(),
        &document.id,
        session.id,
        width,
        session.rotation,
    );

    tracing::info!(
        doc_id = %document.id,
        session_id = %session.id,
        strategy = %strategy,
        file_size = file_size,
        "Started viewing session"
    );

    Ok((
        StatusCode::CREATED,
        Json(ViewResponse {
            session,
            file_size,
            page_count,
            urls,
        }),
    ))
}

async fn update_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(update): Json<SessionUpdate>,
) -> DeliveryResult<Json<DeliverySession>> {
    let session = state.sessions().update(parse_session_id(&sid)?, update).await?;

    if session.strategy == DeliveryStrategy::Image {
        let document = state.registry().get(&session.document_id)?;
        state.prefetch().submit(prefetch_request(&state, &document, &session));
    }

    Ok(Json(session))
}

async fn end_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> DeliveryResult<StatusCode> {
    state.sessions().remove(parse_session_id(&sid)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoomed_width() {
        assert_eq!(zoomed_width(1200, 1.0), 1200);
        assert_eq!(zoomed_width(1200, 1.5), 1800);
        assert_eq!(zoomed_width(1200, 10.0), MAX_WIDTH);
    }

    #[test]
    fn test_delivery_urls() {
        let sid = Uuid::nil();
        let urls = delivery_urls("http://localhost:8787", "abc", sid, 1200, 90);
        assert_eq!(urls.pdf, "http://localhost:8787/pdf/abc");
        assert_eq!(
            urls.image_template,
            "http://localhost:8787/img/abc/{page}?w=1200&rotation=90"
        );
        assert!(urls.session.ends_with("/session/00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_bad_session_id_is_not_found() {
        assert!(matches!(parse_session_id("xyz"), Err(DeliveryError::NotFound(_))));
    }
}
