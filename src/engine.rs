//! Conversion engines and their per-kind registry.
//!
//! An engine turns the bytes of one source document into an ordered list of
//! output units (pages, documents). Engines know nothing about jobs, stores
//! or progress; the runner drives them.

use crate::config::{ConversionKind, RenderParams};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One produced output unit.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedUnit {
    /// 1-based position in the output.
    pub index: usize,
    /// Appended to the source stem to form the output name,
    /// e.g. `_page_3.png` or `.docx`.
    pub suffix: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for RenderedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedUnit")
            .field("index", &self.index)
            .field("suffix", &self.suffix)
            .field("content_type", &self.content_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Turns source bytes into output units.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn convert(
        &self,
        source: Vec<u8>,
        params: &RenderParams,
    ) -> Result<Vec<RenderedUnit>, EngineError>;
}

/// Engines keyed by the conversion they perform.
#[derive(Clone, Default)]
pub struct Engines {
    by_kind: HashMap<ConversionKind, Arc<dyn ConversionEngine>>,
}

impl Engines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the engine for `kind`.
    pub fn register(&mut self, kind: ConversionKind, engine: Arc<dyn ConversionEngine>) {
        self.by_kind.insert(kind, engine);
    }

    pub fn with(mut self, kind: ConversionKind, engine: Arc<dyn ConversionEngine>) -> Self {
        self.register(kind, engine);
        self
    }

    pub fn get(&self, kind: ConversionKind) -> Option<Arc<dyn ConversionEngine>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn supports(&self, kind: ConversionKind) -> bool {
        self.by_kind.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl fmt::Debug for Engines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .by_kind
            .iter()
            .map(|(kind, engine)| format!("{kind}={}", engine.name()))
            .collect();
        names.sort();
        f.debug_struct("Engines").field("by_kind", &names).finish()
    }
}
