use crate::driver::{DomNode, LineageStep, NodeKind};
use crate::errors::BrowserError;

/// Returned for text, comment and document nodes
pub const NON_ELEMENT_SELECTOR: &str = "[non-element-node]";

/// Build a CSS path for `node`.
///
/// An element with an id short-circuits to `#id`. Ids are assumed unique in
/// the document; a duplicated id resolves to the first match.
pub async fn synthesize<N: DomNode>(node: &N) -> Result<String, BrowserError> {
    let lineage = node.lineage().await?;
    Ok(selector_from_lineage(&lineage))
}

/// Pure part of [`synthesize`]: lineage is node first, root last.
pub fn selector_from_lineage(lineage: &[LineageStep]) -> String {
    let Some(first) = lineage.first() else {
        return NON_ELEMENT_SELECTOR.to_string();
    };
    if first.kind != NodeKind::Element {
        return NON_ELEMENT_SELECTOR.to_string();
    }
    if !first.id.is_empty() {
        return format!("#{}", first.id);
    }

    let mut segments: Vec<String> = lineage
        .iter()
        .take_while(|step| step.kind == NodeKind::Element)
        .map(segment)
        .collect();
    segments.reverse();
    segments.join(" > ")
}

fn segment(step: &LineageStep) -> String {
    let mut out = step.tag.clone();
    for class in step.class_name.split_whitespace() {
        out.push('.');
        out.push_str(class);
    }
    out.push_str(&format!(":nth-child({})", step.position));
    out
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod selector_test;
