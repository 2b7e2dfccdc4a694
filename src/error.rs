//! Error types for kohl operations.

use thiserror::Error;

/// Errors that can occur while importing highlights.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("timestamp error: {0}")]
    Time(#[from] chrono::ParseError),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("invalid device manifest: {0}")]
    Manifest(String),

    #[error("invalid Calibre library: {0}")]
    Library(String),

    #[error("unparsable position: {0}")]
    Position(String),

    #[error("unresolvable position: {0}")]
    Resolve(String),
}

pub type Result<T> = std::result::Result<T, Error>;
