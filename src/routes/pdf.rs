//! Raw PDF delivery with byte-range support
//!
//! `GET /pdf/:id` streams the file from disk. A single `Range: bytes=` span is
//! answered with 206; anything outside the file gets 416. Multi-range and
//! malformed headers fall back to the full body.

use std::io::SeekFrom;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{DeliveryError, DeliveryResult};
use crate::range::{self, RangeOutcome};
use crate::state::AppState;

/// Read size for streamed bodies
const CHUNK_SIZE: u64 = 64 * 1024;

pub fn router() -> Router<AppState> {
    Router::new().route("/pdf/:id", get(serve_pdf))
}

async fn serve_pdf(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> DeliveryResult<Response> {
    let document = state.registry().get(&id)?;

    let mut file = File::open(&document.path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeliveryError::NotFound(format!("File for document {} is missing", id))
        } else {
            DeliveryError::Io(e)
        }
    })?;
    let size = file.metadata().await?.len();

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-store")
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", document.name.replace('"', "")),
        );

    let response = match range::evaluate(range_header, size) {
        RangeOutcome::Unsatisfiable => return Err(DeliveryError::InvalidRange { size }),
        RangeOutcome::Full => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .body(file_body(file, size)),
        RangeOutcome::Partial(span) => {
            file.seek(SeekFrom::Start(span.start)).await?;
            tracing::debug!(doc_id = %id, start = span.start, end = span.end, "Serving byte range");
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, span.content_range(size))
                .header(header::CONTENT_LENGTH, span.span_len())
                .body(file_body(file, span.span_len()))
        }
    };

    response.map_err(|e| DeliveryError::Internal(e.to_string()))
}

/// Stream at most `len` bytes from the current file position
fn file_body(file: File, len: u64) -> Body {
    Body::from_stream(futures::stream::try_unfold((file, len), read_chunk))
}

async fn read_chunk((mut file, remaining): (File, u64)) -> std::io::Result<Option<(Bytes, (File, u64))>> {
    if remaining == 0 {
        return Ok(None);
    }

    let mut buf = vec![0u8; remaining.min(CHUNK_SIZE) as usize];
    let read = file.read(&mut buf).await?;
    if read == 0 {
        // File shrank underneath us
        return Ok(None);
    }
    buf.truncate(read);

    Ok(Some((Bytes::from(buf), (file, remaining - read as u64))))
}
