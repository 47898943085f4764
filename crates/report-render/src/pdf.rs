//! PDF rendering through an external `wkhtmltopdf` process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{RenderError, Result};

/// Converts HTML pages into a single PDF document.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new("wkhtmltopdf", Duration::from_secs(120))
    }
}

impl PdfRenderer {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Render every page in order into one PDF.
    pub async fn render(&self, pages: &[String]) -> Result<Vec<u8>> {
        if pages.is_empty() {
            return Err(RenderError::InvalidInput("no pages to render".to_string()));
        }

        let dir = tempfile::tempdir()?;
        let mut inputs = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            let path = dir.path().join(format!("page_{i}.html"));
            tokio::fs::write(&path, page).await?;
            inputs.push(path);
        }
        let output_path = dir.path().join("report.pdf");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--quiet")
            .arg("--encoding")
            .arg("utf-8")
            .args(&inputs)
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.binary.display(), pages = pages.len(), "Running PDF converter");

        let child = cmd.spawn().map_err(|e| {
            RenderError::Pdf(format!("failed to start {}: {}", self.binary.display(), e))
        })?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RenderError::Pdf(format!("converter timed out after {:?}", self.timeout)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("wkhtmltopdf failed: {}", stderr);
            return Err(RenderError::Pdf(format!(
                "converter exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(tokio::fs::read(&output_path).await?)
    }
}
