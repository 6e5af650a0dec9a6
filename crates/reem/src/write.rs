use crate::error::{ReemError, Result};
use crate::tree::{ContentNode, FileType};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Persists resolved output.
pub trait Writer {
    fn write(&self, destination: &Path, contents: &[u8]) -> Result<()>;

    /// Byte-for-byte copy for content that is never rendered.
    fn copy(&self, source: &Path, destination: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsWriter;

impl Writer for FsWriter {
    fn write(&self, destination: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, contents)?;
        Ok(())
    }

    fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, destination)?;
        Ok(())
    }
}

/// Maps nodes to their place under the destination directory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub extension: String,
}

impl OutputPlan {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            extension: extension.into(),
        }
    }

    fn relative<'a>(&self, path: &'a Path) -> Result<&'a Path> {
        path.strip_prefix(&self.source)
            .map_err(|_| ReemError::InvalidPath {
                path: path.to_path_buf(),
            })
    }

    pub fn output_path(&self, node: &ContentNode) -> Result<PathBuf> {
        if node.fixed_write || node.filetype() == FileType::Page {
            let relative: PathBuf = node
                .source_path
                .components()
                .filter(|component| matches!(component, Component::Normal(_)))
                .collect();
            return Ok(self.destination.join(relative).join(node.file_name()));
        }

        let path = match node.filetype() {
            FileType::List => {
                let path = node.path();
                self.destination
                    .join(self.relative(&path)?)
                    .join(format!("index{}", self.extension))
            }
            FileType::Post => self
                .destination
                .join(self.relative(&node.source_path)?)
                .join(format!("{}{}", node.basename, self.extension)),
            _ => self
                .destination
                .join(self.relative(&node.source_path)?)
                .join(node.file_name()),
        };

        Ok(path)
    }

    pub fn url(&self, node: &ContentNode) -> Result<String> {
        let output = self.output_path(node)?;
        let relative = output
            .strip_prefix(&self.destination)
            .map_err(|_| ReemError::InvalidPath {
                path: output.clone(),
            })?;

        let mut segments: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().to_string())
            .collect();

        if node.filetype() == FileType::List {
            segments.pop();
            if segments.is_empty() {
                return Ok("/".to_string());
            }
            return Ok(format!("/{}/", segments.join("/")));
        }

        Ok(format!("/{}", segments.join("/")))
    }
}

pub fn is_html(path: &Path) -> bool {
    path.extension()
        .map(|extension| extension == "html" || extension == "htm")
        .unwrap_or(false)
}

pub fn minify(contents: &str) -> Vec<u8> {
    let mut cfg = minify_html::Cfg::new();
    cfg.minify_css = true;
    cfg.minify_js = true;
    cfg.keep_closing_tags = true;

    minify_html::minify(contents.as_bytes(), &cfg)
}
