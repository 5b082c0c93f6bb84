//! In-process rendering backend and fixture documents for tests and benches

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DeliveryError, DeliveryResult};

use super::traits::{OpenDocument, RenderBackend};
use super::types::RenderParams;

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub renders: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// Deterministic fake: output bytes encode the path and parameters
pub struct FakeBackend {
    pub counters: Arc<Counters>,
    pub page_count: usize,
    pub render_delay: Option<Duration>,
    pub failing_page: Option<usize>,
    on_close: Option<CloseHook>,
}

impl FakeBackend {
    pub fn new(page_count: usize) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            page_count,
            render_delay: None,
            failing_page: None,
            on_close: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_page = Some(page);
        self
    }

    /// Run `hook` whenever a document is closed
    pub fn with_close_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }
}

impl RenderBackend for FakeBackend {
    fn open(&self, path: &Path) -> DeliveryResult<Arc<dyn OpenDocument>> {
        if !path.exists() {
            return Err(DeliveryError::Open(format!("{} does not exist", path.display())));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeDocument {
            path: path.to_path_buf(),
            page_count: self.page_count,
            render_delay: self.render_delay,
            failing_page: self.failing_page,
            counters: Arc::clone(&self.counters),
            on_close: self.on_close.clone(),
        }))
    }
}

struct FakeDocument {
    path: PathBuf,
    page_count: usize,
    render_delay: Option<Duration>,
    failing_page: Option<usize>,
    counters: Arc<Counters>,
    on_close: Option<CloseHook>,
}

impl OpenDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render(&self, params: &RenderParams) -> DeliveryResult<Vec<u8>> {
        if let Some(delay) = self.render_delay {
            std::thread::sleep(delay);
        }
        if params.page >= self.page_count {
            return Err(DeliveryError::PageNotFound {
                page: params.page,
                page_count: self.page_count,
            });
        }
        if self.failing_page == Some(params.page) {
            return Err(DeliveryError::Render(format!("corrupt page {}", params.page)));
        }
        self.counters.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{}|{}|{}|{}|{}|{}",
            self.path.display(),
            params.page,
            params.width,
            params.dpr,
            params.rotation,
            params.format.as_str()
        )
        .into_bytes())
    }
}

impl Drop for FakeDocument {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_close {
            hook();
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Minimal one-page PDF (US Letter, one text line) with a valid xref table
pub fn single_page_pdf() -> Vec<u8> {
    let content = "BT /F1 18 Tf 72 700 Td (Folio test page) Tj ET";
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_start = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    pdf
}
