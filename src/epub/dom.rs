//! Arena-backed DOM for EPUB spine fragments.
//!
//! Highlight positions address elements by path and character offset, so the
//! tree keeps text where reading systems put it: each node owns the run
//! before its first child (`text`) and the run after its own end tag
//! (`tail`). Character offsets computed over these runs carry straight into
//! Calibre's CFI arithmetic.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::util::local_name;

/// Node identifier within one [`Document`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug)]
enum NodeData {
    /// Element with namespace-stripped tag name and optional `id` attribute.
    Element { tag: String, id: Option<String> },
    /// Comment or processing instruction. Holds a slot in the child list so
    /// its tail is a text run, but never counts as an element.
    Other,
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: Option<String>,
    tail: Option<String>,
}

/// A parsed XHTML spine fragment.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Parse an XHTML document into a tree.
    ///
    /// Whitespace is preserved exactly as written: trimming would shift
    /// every character offset computed against the tree.
    pub fn parse(xml: &str) -> Result<Document> {
        let mut reader = Reader::from_str(xml);

        let mut nodes: Vec<Node> = Vec::new();
        let mut root: Option<NodeId> = None;
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = push_element(&mut nodes, &stack, &mut root, &e)?;
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    push_element(&mut nodes, &stack, &mut root, &e)?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(e)) => {
                    append_text(&mut nodes, &stack, &String::from_utf8_lossy(e.as_ref()));
                }
                Ok(Event::CData(e)) => {
                    append_text(&mut nodes, &stack, &String::from_utf8_lossy(e.as_ref()));
                }
                Ok(Event::GeneralRef(e)) => {
                    // Entity references like &apos; &#8217; &#x2019;
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(ch) = resolve_entity(&entity) {
                        let mut buf = [0u8; 4];
                        append_text(&mut nodes, &stack, ch.encode_utf8(&mut buf));
                    }
                }
                Ok(Event::Comment(_)) | Ok(Event::PI(_)) => {
                    push_other(&mut nodes, &stack);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::Xml(e)),
            }
        }

        let root =
            root.ok_or_else(|| Error::InvalidEpub("document has no root element".into()))?;
        Ok(Document { nodes, root })
    }

    /// The document element (usually `<html>`).
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Tag name for elements, `None` for comments and PIs.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element { tag, .. } => Some(tag),
            NodeData::Other => None,
        }
    }

    /// The element's `id` attribute, if any.
    pub fn id_attr(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element { id: Some(value), .. } => Some(value),
            _ => None,
        }
    }

    /// Text run between this node's start tag and its first child.
    ///
    /// `None` when no such run exists; never `Some("")`.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).text.as_deref()
    }

    /// Text run between this node's end tag and the next sibling.
    pub fn tail(&self, id: NodeId) -> Option<&str> {
        self.node(id).tail.as_deref()
    }

    /// All child nodes in document order, comments and PIs included.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Element { .. })
    }

    /// Element children only, in document order.
    pub fn element_children(&self, id: NodeId) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|&child| self.is_element(child))
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }
}

fn push_element(
    nodes: &mut Vec<Node>,
    stack: &[NodeId],
    root: &mut Option<NodeId>,
    e: &BytesStart,
) -> Result<NodeId> {
    let tag = String::from_utf8_lossy(local_name(e.name().as_ref())).into_owned();

    let mut id_attr = None;
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"id" {
            id_attr = Some(String::from_utf8_lossy(&attr.value).into_owned());
        }
    }

    let parent = stack.last().copied();
    if parent.is_none() && root.is_some() {
        return Err(Error::InvalidEpub("multiple root elements".into()));
    }

    let node_id = NodeId(nodes.len() as u32);
    nodes.push(Node {
        data: NodeData::Element { tag, id: id_attr },
        parent,
        children: Vec::new(),
        text: None,
        tail: None,
    });

    match parent {
        Some(p) => nodes[p.0 as usize].children.push(node_id),
        None => *root = Some(node_id),
    }

    Ok(node_id)
}

fn push_other(nodes: &mut Vec<Node>, stack: &[NodeId]) {
    let Some(&parent) = stack.last() else {
        // Comments outside the root element carry no text runs
        return;
    };

    let node_id = NodeId(nodes.len() as u32);
    nodes.push(Node {
        data: NodeData::Other,
        parent: Some(parent),
        children: Vec::new(),
        text: None,
        tail: None,
    });
    nodes[parent.0 as usize].children.push(node_id);
}

/// Append a decoded text run at the current parse position.
///
/// Text lands on the enclosing element's `text` until that element has a
/// child, then on the last child's `tail`.
fn append_text(nodes: &mut Vec<Node>, stack: &[NodeId], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(&current) = stack.last() else {
        return;
    };

    let last_child = nodes[current.0 as usize].children.last().copied();
    let target = match last_child {
        Some(child) => &mut nodes[child.0 as usize].tail,
        None => &mut nodes[current.0 as usize].text,
    };
    match target {
        Some(existing) => existing.push_str(text),
        None => *target = Some(text.to_string()),
    }
}

fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "apos" => Some('\''),
        "quot" => Some('"'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = if let Some(hex) = digits.strip_prefix(['x', 'X']) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                digits.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}
