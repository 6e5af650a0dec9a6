//! Default listing plugin, registered as the only handler of a fresh builder's list stack.

use crate::builder::Reem;
use crate::error::Result;
use crate::parsing::{parse_date, parse_date_from_filename};
use crate::tree::ContentNode;
use crate::ware::{Cursor, Plug};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Fills a list's metadata with `index` (child posts, newest first), `lists`
/// (child lists), `total` and `pages`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexPlugin;

struct Entry {
    title: String,
    url: String,
    date: Option<DateTime<Utc>>,
}

impl Entry {
    fn to_value(&self) -> Value {
        json!({
            "title": self.title,
            "url": self.url,
            "date": self.date.map(|date| date.to_rfc3339()),
        })
    }
}

pub fn post_date(post: &ContentNode) -> Option<DateTime<Utc>> {
    if let Some(date) = post.meta.get_string("date").and_then(|raw| parse_date(&raw)) {
        return Some(date);
    }

    parse_date_from_filename(&post.basename)
        .and_then(|(date, _)| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

impl Plug<Cursor, Reem> for IndexPlugin {
    fn call(&mut self, reem: &mut Reem, cursor: &mut Cursor) -> Result<()> {
        let plan = reem.output_plan();
        let Some(children) = cursor.node()?.children().cloned() else {
            return Ok(());
        };

        let mut posts = Vec::with_capacity(children.posts.len());
        for id in &children.posts {
            let post = cursor.tree.node(*id)?;
            posts.push(Entry {
                title: post.title(),
                url: plan.url(post)?,
                date: post_date(post),
            });
        }
        posts.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.title.cmp(&b.title)));

        let mut lists = Vec::with_capacity(children.lists.len());
        for id in &children.lists {
            let list = cursor.tree.node(*id)?;
            lists.push(json!({ "title": list.title(), "url": plan.url(list)? }));
        }

        let per_page = reem.env.per_page.max(1);
        let pages = posts.len().div_ceil(per_page).max(1);
        let total = posts.len();

        let node = cursor.node_mut()?;
        node.meta.insert(
            "index",
            Value::Array(posts.iter().map(Entry::to_value).collect()),
        );
        node.meta.insert("lists", Value::Array(lists));
        node.meta.insert("total", total);
        node.meta.insert("pages", pages);

        tracing::debug!("Indexed {} posts in {}", total, node.path().display());
        Ok(())
    }
}
