//! Prefetch trigger endpoint
//!
//! Returns 202 as soon as the request is queued; rendering happens on the
//! scheduler.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, DeliveryResult};
use crate::prefetch::PrefetchRequest;
use crate::render::ImageFormat;
use crate::routes::img::{MAX_DPR, MAX_WIDTH, MIN_DPR, MIN_WIDTH};
use crate::state::AppState;

/// Upper bound on pages warmed on each side of the current page
pub const MAX_PREFETCH_RANGE: usize = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/prefetch/:id", post(trigger_prefetch))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefetchBody {
    pub current_page: usize,
    pub width: Option<u32>,
    pub dpr: Option<f32>,
    pub range: Option<usize>,
    pub fmt: Option<String>,
    pub rotation: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchAccepted {
    pub accepted: bool,
    pub document_id: String,
    pub current_page: usize,
    pub range: usize,
}

async fn trigger_prefetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PrefetchBody>,
) -> DeliveryResult<(StatusCode, Json<PrefetchAccepted>)> {
    let document = state.registry().get(&id)?;
    let render = &state.config().render;

    let format = match body.fmt.as_deref() {
        Some(fmt) => fmt.parse::<ImageFormat>().map_err(DeliveryError::BadRequest)?,
        None => ImageFormat::Png,
    };
    let dpr = body.dpr.unwrap_or(render.default_dpr);
    if !dpr.is_finite() {
        return Err(DeliveryError::BadRequest("dpr must be a finite number".to_string()));
    }
    let range = body
        .range
        .unwrap_or(state.config().prefetch.range)
        .min(MAX_PREFETCH_RANGE);

    let accepted = state.prefetch().submit(PrefetchRequest {
        document_id: document.id.clone(),
        path: document.path,
        current_page: body.current_page,
        range,
        width: body.width.unwrap_or(render.default_width).clamp(MIN_WIDTH, MAX_WIDTH),
        dpr: dpr.clamp(MIN_DPR, MAX_DPR),
        rotation: body.rotation.unwrap_or(0),
        format,
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(PrefetchAccepted {
            accepted,
            document_id: document.id,
            current_page: body.current_page,
            range,
        }),
    ))
}
