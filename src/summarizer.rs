use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::driver::{DomNode, NodeKind};
use crate::errors::BrowserError;
use crate::selector;
use crate::types::ElementSnapshot;

/// Longest text kept in a snapshot, in characters
pub const MAX_TEXT_CHARS: usize = 80;

/// Bounds for one summarization walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryOptions {
    pub max_depth: usize,
    pub max_children: usize,
    pub visible_only: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_children: 10,
            visible_only: true,
        }
    }
}

/// Summarize `node` and its descendants into a bounded snapshot.
///
/// Returns `None` when the node is deeper than `max_depth`, filtered out as
/// invisible, or detached from the document while it was being read. Any
/// other engine failure is returned as an error.
pub fn summarize<'a, N: DomNode>(
    node: &'a N,
    depth: usize,
    options: &'a SummaryOptions,
) -> BoxFuture<'a, Result<Option<ElementSnapshot>, BrowserError>> {
    async move {
        match snapshot_node(node, depth, options).await {
            Err(e) if e.is_stale() => {
                tracing::debug!("Skipping node that went stale at depth {}", depth);
                Ok(None)
            }
            other => other,
        }
    }
    .boxed()
}

async fn snapshot_node<N: DomNode>(
    node: &N,
    depth: usize,
    options: &SummaryOptions,
) -> Result<Option<ElementSnapshot>, BrowserError> {
    if depth > options.max_depth {
        return Ok(None);
    }
    if options.visible_only && !node.is_visible().await? {
        return Ok(None);
    }

    let facts = node.facts().await?;
    let text = if facts.kind == NodeKind::Element {
        let raw = match node.inner_text().await {
            Ok(text) => text,
            Err(e) if e.is_stale() => return Err(e),
            Err(_) => node.text_content().await?,
        };
        truncate_text(raw.trim())
    } else {
        String::new()
    };
    let selector = selector::synthesize(node).await?;

    let mut children = Vec::new();
    if facts.kind == NodeKind::Element {
        let nodes = node.children().await?;
        for child in nodes.iter().take(options.max_children) {
            if let Some(summary) = summarize(child, depth + 1, options).await? {
                children.push(summary);
            }
        }
    }

    Ok(Some(ElementSnapshot {
        tag: facts.tag,
        text,
        id: non_empty(facts.id),
        class: non_empty(facts.class_name),
        r#type: non_empty(facts.input_type),
        selector,
        children,
    }))
}

/// Keep at most 80 characters; longer text becomes 77 characters plus `...`
pub fn truncate_text(text: &str) -> String {
    if text.chars().count() > MAX_TEXT_CHARS {
        let head: String = text.chars().take(MAX_TEXT_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
#[path = "summarizer_test.rs"]
mod summarizer_test;
