//! Rendered page images
//!
//! `GET /img/:id/:page?w=&dpr=&fmt=&rotation=` serves one page through the
//! two-tier cache. Query values are clamped to safe bounds; only values that
//! do not parse at all are rejected.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::config::RenderConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::render::{ImageFormat, PageRequest};
use crate::state::AppState;

pub const MIN_WIDTH: u32 = 1;
pub const MAX_WIDTH: u32 = 4000;
pub const MIN_DPR: f32 = 0.1;
pub const MAX_DPR: f32 = 5.0;

/// Browser cache policy for rendered pages
const IMAGE_CACHE_CONTROL: &str = "private, max-age=600";

/// Which cache tier answered (`memory`, `disk` or `miss`)
pub const RENDER_CACHE_HEADER: &str = "x-render-cache";

pub fn router() -> Router<AppState> {
    Router::new().route("/img/:id/:page", get(serve_page))
}

/// Raw query values; parsed by hand so type errors become 400 JSON responses
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub w: Option<String>,
    pub dpr: Option<String>,
    pub fmt: Option<String>,
    pub rotation: Option<String>,
}

impl ImageQuery {
    pub fn to_page_request(&self, page: usize, defaults: &RenderConfig) -> DeliveryResult<PageRequest> {
        let width = match non_empty(&self.w) {
            Some(raw) => parse_width(raw)?,
            None => defaults.default_width,
        };
        let dpr = match non_empty(&self.dpr) {
            Some(raw) => parse_dpr(raw)?,
            None => defaults.default_dpr,
        };
        let format = match non_empty(&self.fmt) {
            Some(raw) => raw.parse::<ImageFormat>().map_err(DeliveryError::BadRequest)?,
            None => ImageFormat::Png,
        };
        let rotation = match non_empty(&self.rotation) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| DeliveryError::BadRequest(format!("rotation must be an integer, got '{}'", raw)))?,
            None => 0,
        };

        Ok(PageRequest {
            page,
            width: width.clamp(MIN_WIDTH, MAX_WIDTH),
            dpr: dpr.clamp(MIN_DPR, MAX_DPR),
            rotation,
            format,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn parse_width(raw: &str) -> DeliveryResult<u32> {
    let width = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| DeliveryError::BadRequest(format!("w must be an integer, got '{}'", raw)))?;
    Ok(width.clamp(MIN_WIDTH as i64, MAX_WIDTH as i64) as u32)
}

fn parse_dpr(raw: &str) -> DeliveryResult<f32> {
    match raw.trim().parse::<f32>() {
        Ok(dpr) if dpr.is_finite() => Ok(dpr),
        _ => Err(DeliveryError::BadRequest(format!("dpr must be a number, got '{}'", raw))),
    }
}

pub(crate) fn parse_page(raw: &str) -> DeliveryResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| DeliveryError::BadRequest(format!("page must be a non-negative integer, got '{}'", raw)))
}

/// Whether `If-None-Match` matches `etag` (weak comparison)
pub fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == etag
    })
}

async fn serve_page(
    State(state): State<AppState>,
    Path((id, page)): Path<(String, String)>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> DeliveryResult<Response> {
    let page = parse_page(&page)?;
    let document = state.registry().get(&id)?;
    let request = query.to_page_request(page, &state.config().render)?;

    let key = state.renderer().key_for(&document.path, &request).await?;
    let etag = key.etag();

    if etag_matches(&headers, &etag) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, &etag)
            .header(header::CACHE_CONTROL, IMAGE_CACHE_CONTROL)
            .body(Body::empty())
            .map_err(|e| DeliveryError::Internal(e.to_string()));
    }

    let format = key.format;
    let rendered = state.renderer().render(key).await.map_err(|e| {
        if e.status_code().is_server_error() {
            tracing::error!(doc_id = %id, page = page, error = %e, "Page render failed");
        }
        e
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.content_type())
        .header(header::CONTENT_LENGTH, rendered.page.size())
        .header(header::ETAG, &etag)
        .header(header::CACHE_CONTROL, IMAGE_CACHE_CONTROL)
        .header(RENDER_CACHE_HEADER, HeaderValue::from_static(rendered.source.as_str()))
        .body(Body::from(rendered.page.data.clone()))
        .map_err(|e| DeliveryError::Internal(e.to_string()))
}
