//! KOReader sidecar files.
//!
//! KOReader keeps a book's reading state in a `.sdr` directory next to the
//! book, as a Lua chunk returning one big table (`metadata.epub.lua`). The
//! `annotations` sequence inside holds highlights and bookmarks. Every field
//! is optional: the sidecar format has drifted across KOReader versions and
//! bookmarks carry fewer fields than highlights.

use std::path::Path;

use mlua::{Lua, Table, Value};

use crate::error::Result;

/// One entry from the sidecar's `annotations` sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceAnnotation {
    /// Start position string.
    pub pos0: Option<String>,
    /// End position string.
    pub pos1: Option<String>,
    /// The highlighted text as KOReader saved it.
    pub text: Option<String>,
    /// KOReader drawer (highlight rendering style).
    pub drawer: Option<String>,
    /// KOReader highlight color name.
    pub color: Option<String>,
    /// Chapter title the highlight falls in.
    pub chapter: Option<String>,
}

/// Read and evaluate a sidecar file.
pub fn read_sidecar<P: AsRef<Path>>(path: P) -> Result<Vec<SourceAnnotation>> {
    let source = std::fs::read_to_string(path)?;
    parse_sidecar(&source)
}

/// Evaluate sidecar source and pull out its annotations in order.
///
/// The chunk runs in an interpreter with the dangerous globals removed:
/// sidecars are data, but they come from a device other software writes to.
pub fn parse_sidecar(source: &str) -> Result<Vec<SourceAnnotation>> {
    let lua = Lua::new();
    sandbox_globals(&lua)?;

    let root: Table = lua.load(source).set_name("sidecar").eval()?;

    let Ok(annotations) = root.get::<Table>("annotations") else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for entry in annotations.sequence_values::<Table>() {
        let entry = entry?;
        out.push(SourceAnnotation {
            pos0: get_string(&entry, "pos0"),
            pos1: get_string(&entry, "pos1"),
            text: get_string(&entry, "text"),
            drawer: get_string(&entry, "drawer"),
            color: get_string(&entry, "color"),
            chapter: get_string(&entry, "chapter"),
        });
    }
    Ok(out)
}

/// Remove dangerous standard library functions from the Lua globals.
fn sandbox_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("os", Value::Nil)?;
    globals.set("io", Value::Nil)?;
    globals.set("loadfile", Value::Nil)?;
    globals.set("dofile", Value::Nil)?;
    globals.set("debug", Value::Nil)?;
    Ok(())
}

fn get_string(table: &Table, key: &str) -> Option<String> {
    match table.get::<Value>(key) {
        Ok(Value::String(s)) => s.to_str().ok().map(|s| s.to_string()),
        _ => None,
    }
}
