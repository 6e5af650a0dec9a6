use crate::error::Result;
use crate::parsing::{is_markdown, parse_markdown};
use crate::tree::ContentNode;
use std::path::Path;
use tera::{Context, Tera};

pub trait Engine {
    fn render(&self, view: &str, item: &ContentNode) -> Result<String>;
}

impl<F> Engine for F
where
    F: Fn(&str, &ContentNode) -> Result<String>,
{
    fn render(&self, view: &str, item: &ContentNode) -> Result<String> {
        self(view, item)
    }
}

pub struct View {
    /// `None` turns rendering into a pass-through of the node's content.
    pub engine: Option<Box<dyn Engine>>,
    /// Suffix appended to the file type to name a node's default view.
    pub extension: String,
}

impl Default for View {
    fn default() -> Self {
        Self {
            engine: None,
            extension: ".html".to_string(),
        }
    }
}

impl View {
    pub fn set_engine(&mut self, engine: impl Engine + 'static) {
        self.engine = Some(Box::new(engine));
    }

    pub fn view_name(&self, item: &ContentNode) -> String {
        format!("{}{}", item.filetype(), self.extension)
    }

    pub fn render(&self, item: &mut ContentNode) -> Result<String> {
        if !item.render_file {
            return Ok(item.content.clone());
        }

        let Some(engine) = &self.engine else {
            return Ok(item.content.clone());
        };

        if item.view.is_none() {
            item.view = Some(self.view_name(item));
        }
        let view = item.view.clone().unwrap_or_default();

        engine.render(&view, item)
    }
}

pub struct TeraEngine {
    tera: Tera,
}

impl TeraEngine {
    /// Loads every template below `layout_dir`.
    pub fn new(layout_dir: &Path) -> Result<Self> {
        let pattern = layout_dir.join("**").join("*");
        let tera = Tera::new(&pattern.to_string_lossy())?;
        Ok(Self { tera })
    }

    pub fn from_tera(tera: Tera) -> Self {
        Self { tera }
    }

    pub fn add_raw_template(&mut self, name: &str, content: &str) -> Result<()> {
        self.tera.add_raw_template(name, content)?;
        Ok(())
    }

    pub fn has_view(&self, view: &str) -> bool {
        self.tera.get_template_names().any(|name| name == view)
    }
}

impl Engine for TeraEngine {
    fn render(&self, view: &str, item: &ContentNode) -> Result<String> {
        let body = if is_markdown(&item.extension) {
            parse_markdown(&item.content)
        } else {
            item.content.clone()
        };

        let mut context = Context::new();
        context.insert("item", item);
        context.insert("meta", &item.meta);
        context.insert("title", &item.title());
        context.insert("content", &body);

        Ok(self.tera.render(view, &context)?)
    }
}
