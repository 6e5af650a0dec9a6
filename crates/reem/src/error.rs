use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReemError {
    #[error("Root directory must be a non-empty UTF-8 path, got: {root:?}")]
    Construction { root: PathBuf },

    #[error("Plugin error: {message}")]
    Plugin { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error in {}: {message}", .path.display())]
    TomlParse { path: PathBuf, message: String },

    #[error("YAML parse error in {}: {message}", .path.display())]
    YamlParse { path: PathBuf, message: String },

    #[error("Invalid frontmatter in file: {}", .path.display())]
    InvalidFrontmatter { path: PathBuf },

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Directory walk error in {}: {message}", .path.display())]
    WalkDir { path: PathBuf, message: String },

    #[error("Path is outside the source directory: {}", .path.display())]
    InvalidPath { path: PathBuf },

    #[error("Node {id} is not part of the tree")]
    NodeNotFound { id: usize },

    #[error("Snapshot error in {}: {message}", .path.display())]
    Snapshot { path: PathBuf, message: String },
}

impl ReemError {
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReemError>;

/// Callback for errors that are reported but do not abort the current operation.
pub type ErrorHandler = Rc<dyn Fn(&ReemError)>;
