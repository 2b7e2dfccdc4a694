//! # kohl
//!
//! Import KOReader highlights into a Calibre library.
//!
//! ## Features
//!
//! - Reads KOReader's device manifest (`.metadata.calibre`) and the Lua
//!   sidecar next to each book
//! - Resolves KOReader position strings against the library's own EPUB
//! - Produces the CFI-like pointers Calibre's viewer stores internally
//! - Merges into `metadata.db` with stable highlight identities, so
//!   re-running the import never duplicates highlights or breaks their
//!   links to notes
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use kohl::sync::{self, SyncOptions};
//!
//! let reports = sync::run(
//!     Path::new("/media/kobo/.metadata.calibre"),
//!     Path::new("/home/reader/Calibre Library"),
//!     SyncOptions::default(),
//! )
//! .unwrap();
//!
//! for report in &reports {
//!     println!("{}: {:?}", report.title, report.outcome);
//! }
//! ```
//!
//! ## Pieces
//!
//! [`koreader`] reads what the device wrote, [`epub`] and [`cfi`] turn
//! position strings into Calibre's internal pointers, and [`calibre`] and
//! [`merge`] reconcile the result into the library database. [`sync`] ties
//! the pipeline together.

pub mod calibre;
pub mod cfi;
pub mod epub;
pub mod error;
pub mod koreader;
pub mod merge;
pub mod sync;
pub(crate) mod util;

pub use error::{Error, Result};
pub use sync::{BookOutcome, BookReport, SyncOptions, run};
