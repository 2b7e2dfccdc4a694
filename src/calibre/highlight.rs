//! Calibre highlight records.
//!
//! The viewer stores each highlight as a JSON blob in the `annotations`
//! table of `metadata.db`. This module owns that shape: the record itself,
//! the drawer/color mapping from KOReader's vocabulary onto the viewer's,
//! and the synthesis of one record from one sidecar annotation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cfi::SpinePoint;
use crate::error::Result;
use crate::koreader::SourceAnnotation;

/// A highlight in the shape Calibre's viewer writes into `annot_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(rename = "type")]
    pub annot_type: String,
    pub start_cfi: String,
    pub end_cfi: String,
    pub spine_index: usize,
    pub spine_name: String,
    pub highlighted_text: String,
    pub uuid: String,
    pub timestamp: String,
    pub style: HighlightStyle,
    pub toc_family_titles: Vec<String>,
}

/// Rendering style, tagged the way the viewer serializes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HighlightStyle {
    Color {
        #[serde(rename = "type")]
        origin: StyleOrigin,
        which: HighlightColor,
    },
    Decoration {
        #[serde(rename = "type")]
        origin: StyleOrigin,
        which: DecorationStyle,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleOrigin {
    Builtin,
}

/// The viewer's built-in highlight colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Red,
    Yellow,
    Green,
    Blue,
    Purple,
}

/// The viewer's built-in text decorations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecorationStyle {
    Wavy,
    Strikeout,
}

impl HighlightStyle {
    pub fn color(which: HighlightColor) -> Self {
        HighlightStyle::Color {
            origin: StyleOrigin::Builtin,
            which,
        }
    }

    pub fn decoration(which: DecorationStyle) -> Self {
        HighlightStyle::Decoration {
            origin: StyleOrigin::Builtin,
            which,
        }
    }

    /// Map KOReader's drawer and color names onto the closest viewer style.
    ///
    /// Decorating drawers win over the color; the `lighten` drawer (plain
    /// highlighting) and anything unrecognized fall through to a color.
    pub fn from_koreader(drawer: &str, color: &str) -> Self {
        match drawer {
            "underscore" => Self::decoration(DecorationStyle::Wavy),
            "strikeout" | "invert" => Self::decoration(DecorationStyle::Strikeout),
            _ => Self::color(match color {
                "red" => HighlightColor::Red,
                "green" | "olive" => HighlightColor::Green,
                "cyan" | "blue" => HighlightColor::Blue,
                "purple" => HighlightColor::Purple,
                // orange, yellow, gray and anything unknown land on yellow
                _ => HighlightColor::Yellow,
            }),
        }
    }
}

/// 22-character url-safe identifier, the shape the viewer generates.
pub fn new_annotation_id(rng: &mut dyn RngCore) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Viewer-style UTC timestamp with millisecond precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Build the Calibre highlight for one sidecar annotation.
///
/// Returns `None` for entries that are not convertible highlights:
/// bookmarks (no positions), records with missing fields, endpoints that no
/// longer resolve against the library's EPUB, and highlights spanning more
/// than one spine document. Every skip is logged at debug level.
pub fn synthesize(
    annotation: &SourceAnnotation,
    resolve: &mut dyn FnMut(&str) -> Result<SpinePoint>,
    rng: &mut dyn RngCore,
    at: DateTime<Utc>,
) -> Option<Highlight> {
    let (Some(pos0), Some(pos1)) = (&annotation.pos0, &annotation.pos1) else {
        debug!("skipping entry without positions");
        return None;
    };
    let (Some(text), Some(drawer), Some(color), Some(chapter)) = (
        &annotation.text,
        &annotation.drawer,
        &annotation.color,
        &annotation.chapter,
    ) else {
        debug!("skipping incomplete highlight record");
        return None;
    };

    let start = match resolve(pos0) {
        Ok(point) => point,
        Err(e) => {
            debug!(position = %pos0, error = %e, "skipping highlight: start does not resolve");
            return None;
        }
    };
    let end = match resolve(pos1) {
        Ok(point) => point,
        Err(e) => {
            debug!(position = %pos1, error = %e, "skipping highlight: end does not resolve");
            return None;
        }
    };

    // Calibre cannot represent a highlight spanning spine documents
    if start.spine_index != end.spine_index {
        debug!(
            start = start.spine_index,
            end = end.spine_index,
            "skipping highlight spanning spine documents"
        );
        return None;
    }

    Some(Highlight {
        annot_type: "highlight".to_string(),
        start_cfi: start.cfi,
        end_cfi: end.cfi,
        spine_index: start.spine_index,
        spine_name: start.spine_name,
        highlighted_text: text.replace("\\\n", "\n"),
        uuid: new_annotation_id(rng),
        timestamp: format_timestamp(at),
        style: HighlightStyle::from_koreader(drawer, color),
        toc_family_titles: vec![chapter.clone()],
    })
}
