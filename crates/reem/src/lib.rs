pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod parsing;
pub mod render;
pub mod scan;
pub mod tree;
pub mod types;
pub mod ware;
pub mod write;

pub use builder::*;
pub use cache::*;
pub use config::*;
pub use error::*;
pub use index::*;
pub use parsing::*;
pub use render::*;
pub use scan::*;
pub use tree::*;
pub use types::*;
pub use ware::*;
pub use write::*;
