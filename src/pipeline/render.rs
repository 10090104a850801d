//! PDF rasterisation: every page → PNG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and synchronous. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so the runtime's worker threads keep serving status reads
//! while a large document renders.
//!
//! ## DPI and the pixel cap
//!
//! Pages are scaled by `dpi / 72` (PDF user space is 72 points per inch).
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! so an oversized poster page cannot exhaust memory.

use crate::config::{RenderParams, MAX_RENDERED_PIXELS};
use crate::engine::{ConversionEngine, RenderedUnit};
use crate::error::EngineError;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a pdfium library file or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Renders each PDF page to a PNG unit named `_page_<n>.png`.
#[derive(Debug, Clone, Default)]
pub struct PdfRasterEngine {
    lib_path: Option<PathBuf>,
}

impl PdfRasterEngine {
    /// Bind to `$PDFIUM_LIB_PATH` if set, else to the system library.
    pub fn new() -> Self {
        Self {
            lib_path: std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from),
        }
    }

    /// Bind to a specific library file or directory.
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            lib_path: Some(path.into()),
        }
    }
}

#[async_trait]
impl ConversionEngine for PdfRasterEngine {
    fn name(&self) -> &str {
        "pdfium"
    }

    async fn convert(
        &self,
        source: Vec<u8>,
        params: &RenderParams,
    ) -> Result<Vec<RenderedUnit>, EngineError> {
        check_pdf_header(&source)?;

        let lib_path = self.lib_path.clone();
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            render_pages_blocking(lib_path.as_deref(), &source, &params)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Render task panicked: {e}")))?
    }
}

/// The `%PDF-` marker must appear near the start of the file.
fn check_pdf_header(bytes: &[u8]) -> Result<(), EngineError> {
    let head = &bytes[..bytes.len().min(1024)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        Ok(())
    } else {
        Err(EngineError::UnsupportedInput {
            detail: "source does not look like a PDF (missing %PDF- header)".into(),
        })
    }
}

fn bind(lib_path: Option<&Path>) -> Result<Pdfium, EngineError> {
    let bindings = match lib_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| EngineError::BindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// pdfium takes the cap as `i32`.
fn pixel_cap(px: u32) -> i32 {
    px.min(MAX_RENDERED_PIXELS) as i32
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    lib_path: Option<&Path>,
    source: &[u8],
    params: &RenderParams,
) -> Result<Vec<RenderedUnit>, EngineError> {
    let pdfium = bind(lib_path)?;

    let document = pdfium
        .load_pdf_from_byte_slice(source, None)
        .map_err(|e| {
            let err_str = format!("{e:?}");
            if err_str.contains("Password") || err_str.contains("password") {
                EngineError::PasswordProtected
            } else {
                EngineError::CorruptInput { detail: err_str }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages at {} DPI", total_pages, params.dpi);

    let max_px = pixel_cap(params.max_rendered_pixels);
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(params.dpi as f32 / 72.0)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let mut units = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            EngineError::RasterisationFailed {
                unit: page_num,
                detail: format!("{e:?}"),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        let bytes = encode_png(&image, params.optimize).map_err(|e| EngineError::EncodeFailed {
            unit: page_num,
            detail: e.to_string(),
        })?;

        units.push(RenderedUnit {
            index: page_num,
            suffix: format!("_page_{page_num}.png"),
            content_type: "image/png".to_string(),
            bytes,
        });
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_check_accepts_pdf_and_rejects_text() {
        assert!(check_pdf_header(b"%PDF-1.7\n%....").is_ok());
        assert!(check_pdf_header(b"\xEF\xBB\xBF%PDF-1.4").is_ok());
        assert!(matches!(
            check_pdf_header(b"\\documentclass{article}"),
            Err(EngineError::UnsupportedInput { .. })
        ));
        assert!(check_pdf_header(b"").is_err());
    }

    #[test]
    fn pixel_cap_never_wraps_negative() {
        assert_eq!(pixel_cap(10_000), 10_000);
        assert_eq!(pixel_cap(u32::MAX), MAX_RENDERED_PIXELS as i32);
        assert!(pixel_cap(3_000_000_000) > 0);
    }

    #[tokio::test]
    async fn non_pdf_fails_before_binding() {
        let engine = PdfRasterEngine::with_library("/nonexistent/libpdfium.so");
        let err = engine
            .convert(b"plain text".to_vec(), &RenderParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedInput { .. }));
    }

    #[tokio::test]
    async fn missing_library_is_a_binding_failure() {
        let engine = PdfRasterEngine::with_library("/nonexistent/libpdfium.so");
        let err = engine
            .convert(b"%PDF-1.4\n".to_vec(), &RenderParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BindingFailed(_)));
    }
}
