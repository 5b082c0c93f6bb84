//! Rendering backend interface
//!
//! The engine never rasterizes pages itself. A backend opens documents and
//! renders single pages to encoded image bytes; both calls are synchronous
//! and CPU-bound, so callers run them on the blocking worker pool.

use std::path::Path;
use std::sync::Arc;

use crate::error::DeliveryResult;

use super::types::RenderParams;

/// An open document owned by the handle pool
///
/// Dropping the last reference closes the underlying document.
pub trait OpenDocument: Send + Sync {
    /// Number of pages in the document
    fn page_count(&self) -> usize;

    /// Render one page to encoded image bytes
    fn render(&self, params: &RenderParams) -> DeliveryResult<Vec<u8>>;
}

/// Factory for open documents
pub trait RenderBackend: Send + Sync {
    /// Open the document at `path`
    fn open(&self, path: &Path) -> DeliveryResult<Arc<dyn OpenDocument>>;
}
