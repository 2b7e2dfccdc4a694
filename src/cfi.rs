//! Calibre-internal CFI generation.
//!
//! Calibre's viewer anchors each highlight with a short CFI evaluated
//! against a single spine document, e.g. `/2/4/2[intro]/1:16`. Even numbers
//! walk element children (two per 1-based position, with the element's `id`
//! attached as an assertion when present) and the final `1:offset` addresses
//! a character within the element's combined text runs.
//!
//! KOReader and Calibre disagree about where a boundary position "is", so
//! building the CFI takes more than arithmetic. A zero offset is re-anchored
//! at the first element that actually carries text, and a zero offset into a
//! run that follows an element island is re-anchored at the end of that
//! island's last text descendant.

use crate::epub::{Document, NodeId};
use crate::error::{Error, Result};
use crate::koreader::{PathStep, SourcePosition};

/// Island anchors nest at most once in well-formed documents; the guard
/// stops malformed ones from recursing forever.
const MAX_REBASE_DEPTH: usize = 32;

/// A resolved highlight endpoint: the CFI plus the spine document it lives
/// in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinePoint {
    pub cfi: String,
    /// 0-based index into the spine.
    pub spine_index: usize,
    /// Archive path of the spine document.
    pub spine_name: String,
}

/// Build the Calibre-internal CFI for a position within `doc`.
pub fn position_to_cfi(doc: &Document, position: &SourcePosition) -> Result<String> {
    let element = resolve_path(doc, &position.path)?;
    build_cfi(doc, element, position.offset, position.text_index, 0)
}

/// Walk a position path down from the document root.
///
/// A step with an index picks the n-th same-tag element child. A step
/// without one must match exactly one child: several candidates mean the
/// document no longer agrees with the position, and guessing would silently
/// anchor the highlight to the wrong element.
fn resolve_path(doc: &Document, path: &[PathStep]) -> Result<NodeId> {
    let mut current = doc.root();

    for step in path {
        let mut candidates = doc
            .element_children(current)
            .filter(|&child| doc.tag(child) == Some(step.name.as_str()));

        current = match step.index {
            Some(index) => candidates.nth(index - 1).ok_or_else(|| {
                Error::Resolve(format!("no child {}[{}]", step.name, index))
            })?,
            None => {
                let first = candidates
                    .next()
                    .ok_or_else(|| Error::Resolve(format!("no child {}", step.name)))?;
                if candidates.next().is_some() {
                    return Err(Error::Resolve(format!(
                        "step {} matches more than one child",
                        step.name
                    )));
                }
                first
            }
        };
    }

    Ok(current)
}

fn build_cfi(
    doc: &Document,
    raw_element: NodeId,
    offset: usize,
    text_index: Option<usize>,
    depth: usize,
) -> Result<String> {
    if depth > MAX_REBASE_DEPTH {
        return Err(Error::Resolve("island re-anchoring recursed too deep".into()));
    }

    // A zero offset names the boundary before any text; anchor it at the
    // first element that actually carries some.
    let element = if offset == 0 {
        first_text_descendant(doc, raw_element)
    } else {
        raw_element
    };

    let mut steps = steps_to(doc, element)?;
    let runs = text_runs(doc, element);

    if let Some(index) = text_index
        && index > 1
        && offset == 0
    {
        let Some(&(_, child)) = runs.get(index - 1) else {
            return Err(Error::Resolve(format!(
                "text run {index} out of range ({} runs)",
                runs.len()
            )));
        };
        if let Some(island) = child {
            let anchor = last_text_descendant(doc, island);
            if let Some(text) = doc.text(anchor) {
                // Zero characters into the run after the island is the same
                // point as the end of the island's own text.
                let rebased = offset + text.chars().count();
                return build_cfi(doc, anchor, rebased, None, depth + 1);
            }
        }
        steps.push(format!("1:{}", prior_chars(&runs, index) + offset));
    } else {
        let prior = match text_index {
            Some(index) => prior_chars(&runs, index),
            None => 0,
        };
        steps.push(format!("1:{}", prior + offset));
    }

    Ok(format!("/{}", steps.join("/")))
}

/// CFI steps from the document root down to `element`.
fn steps_to(doc: &Document, element: NodeId) -> Result<Vec<String>> {
    let mut steps = Vec::new();
    let mut current = element;

    while let Some(parent) = doc.parent(current) {
        let index = doc
            .element_children(parent)
            .position(|child| child == current)
            .ok_or_else(|| Error::Resolve("node lost among its siblings".into()))?;

        let step_number = 2 * (index + 1);
        let step = match doc.id_attr(current) {
            Some(id) => format!("{step_number}[{id}]"),
            None => step_number.to_string(),
        };
        steps.push(step);
        current = parent;
    }

    // The implied step from the document node into the root element
    steps.push("2".to_string());
    steps.reverse();
    Ok(steps)
}

/// The text runs directly under `element`: its leading text plus every
/// child's tail, each tail paired with the child it follows.
fn text_runs<'doc>(doc: &'doc Document, element: NodeId) -> Vec<(&'doc str, Option<NodeId>)> {
    let mut runs = Vec::new();
    if let Some(text) = doc.text(element) {
        runs.push((text, None));
    }
    for &child in doc.children(element) {
        if let Some(tail) = doc.tail(child) {
            runs.push((tail, Some(child)));
        }
    }
    runs
}

/// Characters in the runs before the 1-based run `index`.
fn prior_chars(runs: &[(&str, Option<NodeId>)], index: usize) -> usize {
    runs.iter()
        .take(index - 1)
        .map(|(text, _)| text.chars().count())
        .sum()
}

/// Descend through first element children until reaching an element that
/// either carries leading text or has no element children at all.
fn first_text_descendant(doc: &Document, element: NodeId) -> NodeId {
    let mut current = element;
    loop {
        let Some(first) = doc.element_children(current).next() else {
            return current;
        };
        if doc.text(current).is_some_and(|t| !t.trim().is_empty()) {
            return current;
        }
        current = first;
    }
}

/// The last element under `element` (inclusive, document order) with leading
/// text, or the last element visited when none has any.
fn last_text_descendant(doc: &Document, element: NodeId) -> NodeId {
    let mut stack = vec![element];
    let mut last_with_text = None;
    let mut last_visited = element;

    while let Some(current) = stack.pop() {
        last_visited = current;
        if doc.text(current).is_some_and(|t| !t.trim().is_empty()) {
            last_with_text = Some(current);
        }
        stack.extend(doc.element_children(current).rev());
    }

    last_with_text.unwrap_or(last_visited)
}
