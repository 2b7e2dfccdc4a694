//! Calibre-side data model: the library database and the viewer's
//! highlight records.

mod highlight;
mod library;

pub use highlight::{
    DecorationStyle, Highlight, HighlightColor, HighlightStyle, StyleOrigin, format_timestamp,
    new_annotation_id, synthesize,
};
pub use library::CalibreLibrary;
