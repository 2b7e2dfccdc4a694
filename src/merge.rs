//! Reconciling freshly synthesized highlights with rows already stored in
//! the library.

use serde_json::Value;

use crate::calibre::Highlight;

/// A highlight row already present in the annotations table.
///
/// Stored data is kept as loose JSON: Calibre's viewer writes more fields
/// than this tool does, and rows written by other tools may omit some.
#[derive(Debug, Clone)]
pub struct StoredHighlight {
    pub row_id: i64,
    pub data: Value,
}

impl StoredHighlight {
    pub fn uuid(&self) -> Option<&str> {
        self.data.get("uuid").and_then(Value::as_str)
    }

    fn start_cfi(&self) -> Option<&str> {
        self.data.get("start_cfi").and_then(Value::as_str)
    }

    fn end_cfi(&self) -> Option<&str> {
        self.data.get("end_cfi").and_then(Value::as_str)
    }

    fn spine_index(&self) -> Option<u64> {
        self.data.get("spine_index").and_then(Value::as_u64)
    }

    /// Whether this row marks the same text range as `highlight`.
    fn matches(&self, highlight: &Highlight) -> bool {
        self.spine_index() == Some(highlight.spine_index as u64)
            && self.start_cfi() == Some(highlight.start_cfi.as_str())
            && self.end_cfi() == Some(highlight.end_cfi.as_str())
    }
}

/// What [`CalibreLibrary::apply`](crate::calibre::CalibreLibrary::apply)
/// should do for one book.
#[derive(Debug, Default)]
pub struct MergePlan {
    pub upserts: Vec<Highlight>,
    pub delete_ids: Vec<i64>,
}

/// Match new highlights against stored rows by text range.
///
/// A new highlight covering the same range as a stored row inherits the
/// stored row's uuid, so re-running the import leaves Calibre's identifiers
/// stable. Each stored row is consumed by at most one match; rows left
/// unmatched are scheduled for deletion.
pub fn reconcile(new: Vec<Highlight>, stored: Vec<StoredHighlight>) -> MergePlan {
    let mut remaining = stored;
    let mut upserts = Vec::with_capacity(new.len());

    for mut highlight in new {
        if let Some(found) = remaining.iter().position(|row| row.matches(&highlight)) {
            let row = remaining.remove(found);
            if let Some(uuid) = row.uuid() {
                highlight.uuid = uuid.to_string();
            }
        }
        upserts.push(highlight);
    }

    MergePlan {
        upserts,
        delete_ids: remaining.into_iter().map(|row| row.row_id).collect(),
    }
}
