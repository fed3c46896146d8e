//! PDF page to image conversion via external tools

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::dependencies::ConversionBackend;
use crate::config::ProgramNames;
use crate::error::{Error, Result};

/// One page rasterization request
#[derive(Debug, Clone)]
pub struct PageConversion {
    pub pdf_path: PathBuf,
    /// 1-indexed
    pub page_number: u32,
    pub output_dir: PathBuf,
    pub dpi: u32,
    pub backend: ConversionBackend,
}

impl PageConversion {
    /// Image path the backend writes to
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("page-{:04}.png", self.page_number))
    }
}

/// Renders a single PDF page to an image file
#[async_trait]
pub trait PageConverter: Send + Sync {
    /// Returns the path of the written image
    async fn convert_page(&self, request: &PageConversion) -> Result<PathBuf>;
}

/// Shells out to pdftoppm, GraphicsMagick or ImageMagick
pub struct CommandLineConverter {
    programs: ProgramNames,
}

impl CommandLineConverter {
    pub fn new(programs: ProgramNames) -> Self {
        Self { programs }
    }

    fn command(&self, request: &PageConversion) -> Command {
        let output = request.output_path();
        let page = request.page_number.to_string();
        let dpi = request.dpi.to_string();

        match request.backend {
            ConversionBackend::Pdftoppm => {
                // -singlefile writes <prefix>.png without a page suffix
                let prefix = output.with_extension("");
                let mut cmd = Command::new(&self.programs.pdftoppm);
                cmd.args(["-png", "-r", &dpi, "-f", &page, "-l", &page, "-singlefile"])
                    .arg(&request.pdf_path)
                    .arg(prefix);
                cmd
            }
            ConversionBackend::GraphicsMagick => {
                let mut cmd = Command::new(&self.programs.graphicsmagick);
                cmd.args(["convert", "-density", &dpi])
                    .arg(page_selector(&request.pdf_path, request.page_number))
                    .arg(&output);
                cmd
            }
            ConversionBackend::ImageMagick => {
                let mut cmd = Command::new(&self.programs.imagemagick);
                cmd.args(["-density", &dpi])
                    .arg(page_selector(&request.pdf_path, request.page_number))
                    .arg(&output);
                cmd
            }
        }
    }
}

/// `file.pdf[N]` with a 0-indexed page, as the Magick tools expect
fn page_selector(pdf_path: &Path, page_number: u32) -> String {
    format!("{}[{}]", pdf_path.display(), page_number.saturating_sub(1))
}

#[async_trait]
impl PageConverter for CommandLineConverter {
    async fn convert_page(&self, request: &PageConversion) -> Result<PathBuf> {
        let output = self
            .command(request)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::conversion(format!("Failed to run {}: {}", request.backend, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::conversion(format!(
                "{} error on page {}: {}",
                request.backend,
                request.page_number,
                stderr.trim()
            )));
        }

        let path = request.output_path();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::conversion(format!(
                "{} produced no image for page {}",
                request.backend, request.page_number
            )));
        }
        Ok(path)
    }
}
