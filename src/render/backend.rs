//! MuPDF rendering backend
//!
//! Opens PDFs with MuPDF and rasterizes single pages, encoding the pixmap
//! with the `image` crate.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};
use mupdf::{Colorspace, Document, Matrix};
use parking_lot::Mutex;

use crate::error::{DeliveryError, DeliveryResult};

use super::traits::{OpenDocument, RenderBackend};
use super::types::{ImageFormat, RenderParams};

/// JPEG quality for lossy page output
const JPEG_QUALITY: u8 = 85;

/// Backend that renders through MuPDF
#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RenderBackend for MupdfBackend {
    fn open(&self, path: &Path) -> DeliveryResult<Arc<dyn OpenDocument>> {
        let path_str = path.to_string_lossy();
        let doc = Document::open(&*path_str)
            .map_err(|e| DeliveryError::Open(format!("{}: {}", path.display(), e)))?;
        let page_count = doc
            .page_count()
            .map_err(|e| DeliveryError::Open(format!("{}: {}", path.display(), e)))?
            .max(0) as usize;

        tracing::debug!(path = %path.display(), page_count, "Opened document with MuPDF");

        Ok(Arc::new(MupdfDocument {
            doc: Mutex::new(doc),
            page_count,
        }))
    }
}

/// Open MuPDF document
///
/// All access goes through the mutex, so at most one thread touches the
/// underlying `fz_document` at a time.
pub struct MupdfDocument {
    doc: Mutex<Document>,
    page_count: usize,
}

// SAFETY: `mupdf::Document` holds raw pointers and is therefore neither Send
// nor Sync. The only field that contains it is the mutex; every use locks it
// for the whole duration of a page load + rasterization and no page, pixmap or
// document reference escapes the locked scope. MuPDF's per-thread contexts are
// cloned from a shared base context with locking enabled, so moving the
// document between threads while serialized is sound.
unsafe impl Send for MupdfDocument {}
unsafe impl Sync for MupdfDocument {}

impl OpenDocument for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render(&self, params: &RenderParams) -> DeliveryResult<Vec<u8>> {
        if params.page >= self.page_count {
            return Err(DeliveryError::PageNotFound {
                page: params.page,
                page_count: self.page_count,
            });
        }

        let doc = self.doc.lock();
        let page = doc.load_page(params.page as i32)?;
        let bounds = page.bounds()?;

        // Fit the rotated page to the requested pixel width
        let page_width = bounds.x1 - bounds.x0;
        let page_height = bounds.y1 - bounds.y0;
        let visible_width = if params.rotation % 180 == 0 {
            page_width
        } else {
            page_height
        };
        if visible_width <= 0.0 {
            return Err(DeliveryError::Render(format!(
                "page {} has an empty media box",
                params.page
            )));
        }
        let scale = params.pixel_width() as f32 / visible_width;

        let mut matrix = Matrix::new_scale(scale, scale);
        if params.rotation != 0 {
            matrix.concat(Matrix::new_rotate(params.rotation as f32));
        }

        let pixmap = page.to_pixmap(&matrix, &Colorspace::device_rgb(), false, true)?;
        encode_pixmap(&pixmap, params.format)
    }
}

fn encode_pixmap(pixmap: &mupdf::Pixmap, format: ImageFormat) -> DeliveryResult<Vec<u8>> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let n = pixmap.n() as usize;

    // Repack to tight RGB; pixmaps may carry an alpha channel
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for pixel in samples.chunks_exact(n.max(1)).take((width * height) as usize) {
        let r = pixel.first().copied().unwrap_or(0);
        let g = pixel.get(1).copied().unwrap_or(r);
        let b = pixel.get(2).copied().unwrap_or(r);
        rgb.extend_from_slice(&[r, g, b]);
    }
    if rgb.len() != (width * height * 3) as usize {
        return Err(DeliveryError::Render(
            "pixmap sample buffer is shorter than its dimensions".to_string(),
        ));
    }

    encode_rgb(&rgb, width, height, format)
}

/// Encode a tightly packed RGB8 buffer
pub fn encode_rgb(
    rgb: &[u8],
    width: u32,
    height: u32,
    format: ImageFormat,
) -> DeliveryResult<Vec<u8>> {
    let mut output = Vec::new();
    let cursor = Cursor::new(&mut output);

    let result = match format {
        ImageFormat::Png => {
            PngEncoder::new(cursor).write_image(rgb, width, height, ExtendedColorType::Rgb8)
        }
        ImageFormat::Jpeg => JpegEncoder::new_with_quality(cursor, JPEG_QUALITY).write_image(
            rgb,
            width,
            height,
            ExtendedColorType::Rgb8,
        ),
        ImageFormat::Webp => {
            WebPEncoder::new_lossless(cursor).write_image(rgb, width, height, ExtendedColorType::Rgb8)
        }
    };
    result.map_err(|e| DeliveryError::Render(format!("image encoding failed: {}", e)))?;

    Ok(output)
}
