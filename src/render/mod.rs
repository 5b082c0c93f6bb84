//! Page rendering
//!
//! - [`RenderBackend`] / [`OpenDocument`]: the rasterization boundary
//! - [`MupdfBackend`]: production backend built on MuPDF
//! - [`RenderService`]: cache-aware render path over a bounded worker pool

mod backend;
mod service;
mod traits;
mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backend::{encode_rgb, MupdfBackend, MupdfDocument};
pub use service::{PageRequest, RenderService, RenderStats, Rendered};
pub use traits::{OpenDocument, RenderBackend};
pub use types::{ImageFormat, RenderParams};
