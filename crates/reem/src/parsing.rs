use crate::error::{ReemError, Result};
use crate::types::Frontmatter;
use chrono::{DateTime, NaiveDate, Utc};
use pulldown_cmark::{Options, Parser, html};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const MARKDOWN_EXTENSIONS: [&str; 2] = [".md", ".markdown"];

pub fn is_markdown(extension: &str) -> bool {
    MARKDOWN_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(extension))
}

pub fn parse_markdown(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let parser = Parser::new_ext(content, options);
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}

pub fn extract_frontmatter(content: &str, path: &Path) -> Result<(Frontmatter, String)> {
    let content = content.replace("\r\n", "\n");
    let content = content.trim_start();

    if content.starts_with("+++") {
        parse_toml_frontmatter(content, path)
    } else if content.starts_with("---") {
        parse_yaml_frontmatter(content, path)
    } else {
        Ok((Frontmatter::default(), content.to_string()))
    }
}

fn parse_toml_frontmatter(content: &str, path: &Path) -> Result<(Frontmatter, String)> {
    let (block, body) = split_block(&content[3..], "+++", path)?;

    let table: toml::Table = toml::from_str(block).map_err(|error| ReemError::TomlParse {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;

    let raw = table
        .into_iter()
        .map(|(key, value)| (key, toml_to_json(value)))
        .collect();

    Ok((Frontmatter { raw }, body))
}

/// TOML dates and times are kept as their textual form so they read back as strings.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(text) => Value::String(text),
        toml::Value::Integer(number) => Value::from(number),
        toml::Value::Float(number) => Value::from(number),
        toml::Value::Boolean(flag) => Value::Bool(flag),
        toml::Value::Datetime(datetime) => Value::String(datetime.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

fn parse_yaml_frontmatter(content: &str, path: &Path) -> Result<(Frontmatter, String)> {
    let (block, body) = split_block(&content[3..], "---", path)?;

    if block.trim().is_empty() {
        return Ok((Frontmatter::default(), body));
    }

    let raw: BTreeMap<String, Value> =
        serde_yml::from_str(block).map_err(|error| ReemError::YamlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;

    Ok((Frontmatter { raw }, body))
}

fn split_block<'a>(rest: &'a str, delimiter: &str, path: &Path) -> Result<(&'a str, String)> {
    let end_index =
        find_closing_delimiter(rest, delimiter).ok_or_else(|| ReemError::InvalidFrontmatter {
            path: path.to_path_buf(),
        })?;

    let block = &rest[..end_index];
    let body = &rest[end_index + delimiter.len()..];
    Ok((block, body.trim().to_string()))
}

fn find_closing_delimiter(content: &str, delimiter: &str) -> Option<usize> {
    let mut position = 0;

    for line in content.split_inclusive('\n') {
        if line.trim() == delimiter {
            return Some(position);
        }
        position += line.len();
    }

    None
}

/// Splits a `YYYY-MM-DD-slug` basename into its date and slug.
pub fn parse_date_from_filename(basename: &str) -> Option<(NaiveDate, String)> {
    let date_part = basename.get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;

    let slug = match basename.get(10..) {
        Some(rest) if rest.starts_with('-') && rest.len() > 1 => rest[1..].to_string(),
        _ => basename.to_string(),
    };

    Some((date, slug))
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}
