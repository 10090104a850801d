//! Conversion stages shared by the job runner and the synchronous facade.
//!
//! ## Data Flow
//!
//! ```text
//! source bytes ──▶ engine (render | latex) ──▶ encode ──▶ emit
//!                  (pdfium / pandoc)          (PNG, b64)  (upload | inline)
//! ```
//!
//! 1. [`render`]: rasterise every PDF page; runs in `spawn_blocking` because
//!    pdfium is synchronous and CPU-bound
//! 2. [`latex`]: LaTeX → DOCX (→ PDF) through external tools
//! 3. [`encode`]: PNG encoding and base64 wrapping for inline results
//! 4. [`emit`]: name, upload or inline each produced unit

pub mod emit;
pub mod encode;
pub mod latex;
pub mod render;
