//! Document metadata endpoint

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::cache::{DPR_TIERS, WIDTH_TIERS};
use crate::error::{DeliveryError, DeliveryResult};
use crate::render::ImageFormat;
use crate::state::AppState;
use crate::strategy::DeliveryStrategy;

pub fn router() -> Router<AppState> {
    Router::new().route("/info/:id", get(document_info))
}

#[derive(Debug, Default, Deserialize)]
pub struct InfoQuery {
    /// Forced delivery mode
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    pub page_count: usize,
    pub file_size: u64,
    pub strategy: DeliveryStrategy,
    pub formats: Vec<ImageFormat>,
    pub default_width: u32,
    pub default_dpr: f32,
    pub width_tiers: Vec<u32>,
    pub dpr_tiers: Vec<f32>,
}

/// Parse an optional `mode` override
pub(crate) fn forced_mode(mode: Option<&str>) -> DeliveryResult<Option<DeliveryStrategy>> {
    match mode.map(str::trim).filter(|m| !m.is_empty() && *m != "auto") {
        Some(mode) => mode
            .parse::<DeliveryStrategy>()
            .map(Some)
            .map_err(DeliveryError::BadRequest),
        None => Ok(None),
    }
}

async fn document_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<InfoQuery>,
) -> DeliveryResult<Json<DocumentInfo>> {
    let document = state.registry().get(&id)?;
    let forced = forced_mode(query.mode.as_deref())?;

    let file_size = tokio::fs::metadata(&document.path)
        .await
        .map(|m| m.len())
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeliveryError::NotFound(format!("File for document {} is missing", id))
            } else {
                DeliveryError::Io(e)
            }
        })?;
    let page_count = state.renderer().page_count(&document.path).await?;
    let render = &state.config().render;

    Ok(Json(DocumentInfo {
        strategy: state.selector().select(file_size, forced),
        id: document.id,
        name: document.name,
        page_count,
        file_size,
        formats: ImageFormat::ALL.to_vec(),
        default_width: render.default_width,
        default_dpr: render.default_dpr,
        width_tiers: WIDTH_TIERS.to_vec(),
        dpr_tiers: DPR_TIERS.to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_mode() {
        assert_eq!(forced_mode(None).unwrap(), None);
        assert_eq!(forced_mode(Some("auto")).unwrap(), None);
        assert_eq!(forced_mode(Some("image")).unwrap(), Some(DeliveryStrategy::Image));
        assert!(forced_mode(Some("carrier-pigeon")).is_err());
    }
}
