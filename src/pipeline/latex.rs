//! LaTeX → DOCX via pandoc, optionally DOCX → PDF via LibreOffice.
//!
//! Both tools run as child processes inside a scratch directory that is
//! removed when the conversion returns.

use crate::config::RenderParams;
use crate::engine::{ConversionEngine, RenderedUnit};
use crate::error::EngineError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Produces `.docx` (unit 1) and, with `generate_pdf`, `.pdf` (unit 2).
#[derive(Debug, Clone)]
pub struct LatexEngine {
    pandoc: PathBuf,
    soffice: PathBuf,
    reference_doc: Option<PathBuf>,
    lua_filter: Option<PathBuf>,
}

impl Default for LatexEngine {
    fn default() -> Self {
        Self {
            pandoc: PathBuf::from("pandoc"),
            soffice: PathBuf::from("soffice"),
            reference_doc: None,
            lua_filter: None,
        }
    }
}

impl LatexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pandoc(mut self, path: impl Into<PathBuf>) -> Self {
        self.pandoc = path.into();
        self
    }

    pub fn soffice(mut self, path: impl Into<PathBuf>) -> Self {
        self.soffice = path.into();
        self
    }

    /// DOCX whose styles pandoc copies into the output.
    pub fn reference_doc(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_doc = Some(path.into());
        self
    }

    pub fn lua_filter(mut self, path: impl Into<PathBuf>) -> Self {
        self.lua_filter = Some(path.into());
        self
    }

    fn pandoc_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.into(),
            "--from=latex".into(),
            "--to=docx".into(),
            "--standalone".into(),
            "-o".into(),
            output.into(),
        ];
        if let Some(doc) = &self.reference_doc {
            let mut arg = OsString::from("--reference-doc=");
            arg.push(doc);
            args.push(arg);
        }
        if let Some(filter) = &self.lua_filter {
            let mut arg = OsString::from("--lua-filter=");
            arg.push(filter);
            args.push(arg);
        }
        args
    }
}

#[async_trait]
impl ConversionEngine for LatexEngine {
    fn name(&self) -> &str {
        "pandoc"
    }

    async fn convert(
        &self,
        source: Vec<u8>,
        params: &RenderParams,
    ) -> Result<Vec<RenderedUnit>, EngineError> {
        if std::str::from_utf8(&source).is_err() {
            return Err(EngineError::UnsupportedInput {
                detail: "LaTeX source must be UTF-8 text".into(),
            });
        }

        let scratch = tempfile::tempdir()
            .map_err(|e| EngineError::Internal(format!("tempdir: {e}")))?;
        let tex = scratch.path().join("input.tex");
        let docx = scratch.path().join("input.docx");
        tokio::fs::write(&tex, &source)
            .await
            .map_err(|e| EngineError::Internal(format!("write source: {e}")))?;

        run_tool("pandoc", &self.pandoc, &self.pandoc_args(&tex, &docx), scratch.path()).await?;
        let docx_bytes = read_output("pandoc", &docx).await?;
        info!("LaTeX converted → {} bytes DOCX", docx_bytes.len());

        let mut units = vec![RenderedUnit {
            index: 1,
            suffix: ".docx".to_string(),
            content_type: DOCX_CONTENT_TYPE.to_string(),
            bytes: docx_bytes,
        }];

        if params.generate_pdf {
            let args: Vec<OsString> = vec![
                "--headless".into(),
                "--convert-to".into(),
                "pdf".into(),
                "--outdir".into(),
                scratch.path().into(),
                docx.clone().into(),
            ];
            run_tool("soffice", &self.soffice, &args, scratch.path()).await?;
            let pdf_bytes = read_output("soffice", &docx.with_extension("pdf")).await?;
            info!("DOCX converted → {} bytes PDF", pdf_bytes.len());
            units.push(RenderedUnit {
                index: 2,
                suffix: ".pdf".to_string(),
                content_type: PDF_CONTENT_TYPE.to_string(),
                bytes: pdf_bytes,
            });
        }

        Ok(units)
    }
}

async fn run_tool(
    tool: &str,
    program: &Path,
    args: &[OsString],
    cwd: &Path,
) -> Result<(), EngineError> {
    debug!(tool, program = %program.display(), "Running converter");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| EngineError::ToolMissing {
            tool: tool.to_string(),
            detail: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(EngineError::ToolFailed {
        tool: tool.to_string(),
        code: output.status.code(),
        stderr: stderr.trim().chars().take(2000).collect(),
    })
}

async fn read_output(tool: &str, path: &Path) -> Result<Vec<u8>, EngineError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(EngineError::ToolFailed {
            tool: tool.to_string(),
            code: Some(0),
            stderr: format!("{} is empty", path.display()),
        }),
        Err(e) => Err(EngineError::ToolFailed {
            tool: tool.to_string(),
            code: Some(0),
            stderr: format!("expected output {} missing: {e}", path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pandoc_args_include_optional_assets() {
        let engine = LatexEngine::new()
            .reference_doc("/opt/ref.docx")
            .lua_filter("/opt/filter.lua");
        let args = engine.pandoc_args(Path::new("in.tex"), Path::new("out.docx"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..4], ["in.tex", "--from=latex", "--to=docx", "--standalone"]);
        assert!(args.contains(&"--reference-doc=/opt/ref.docx".to_string()));
        assert!(args.contains(&"--lua-filter=/opt/filter.lua".to_string()));
    }

    #[test]
    fn pandoc_args_without_assets() {
        let args = LatexEngine::new().pandoc_args(Path::new("a.tex"), Path::new("a.docx"));
        assert_eq!(args.len(), 6);
    }

    #[tokio::test]
    async fn binary_input_is_rejected() {
        let err = LatexEngine::new()
            .convert(vec![0xff, 0xfe, 0x00], &RenderParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedInput { .. }));
    }

    #[tokio::test]
    async fn missing_pandoc_is_reported() {
        let err = LatexEngine::new()
            .pandoc("/nonexistent/bin/pandoc")
            .convert(b"\\documentclass{article}".to_vec(), &RenderParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolMissing { ref tool, .. } if tool == "pandoc"));
    }
}
