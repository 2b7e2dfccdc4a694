//! The import pipeline: device manifest in, reconciled library rows out.
//!
//! Books are independent. Run-level setup failures (unreadable manifest,
//! unopenable library) abort; anything that goes wrong inside one book is
//! reported on that book and the run moves on.

use std::io::{Read, Seek};
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::calibre::{CalibreLibrary, synthesize};
use crate::cfi::{SpinePoint, position_to_cfi};
use crate::epub::EpubContainer;
use crate::error::{Error, Result};
use crate::koreader::{DeviceBook, SourcePosition, read_manifest, read_sidecar, sidecar_path};
use crate::merge::reconcile;

/// Highlights are only imported into this Calibre format.
const FORMAT: &str = "EPUB";

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Compute and report merge plans without touching the database.
    pub dry_run: bool,
}

/// What happened to one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookOutcome {
    Synced {
        /// Annotation entries found in the sidecar.
        found: usize,
        /// Highlights written, or that a dry run would have written.
        upserts: usize,
        /// Stale library rows removed.
        deletes: usize,
    },
    /// No Calibre id in the manifest, or an id the library does not know.
    NotFound,
    /// The library holds no EPUB file for this book.
    NoEpub,
    /// No sidecar next to the book on the device.
    NoSidecar,
    /// The sidecar exists but records no annotations.
    NoAnnotations,
    /// Annotations exist but none of them converted to a highlight.
    NoHighlights,
    /// This book failed; the run continued with the others.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookReport {
    pub title: String,
    pub outcome: BookOutcome,
}

/// Import highlights for every book in the device manifest.
pub fn run(
    manifest_path: &Path,
    library_path: &Path,
    options: SyncOptions,
) -> Result<Vec<BookReport>> {
    let books = read_manifest(manifest_path)?;
    let mut library = CalibreLibrary::open(library_path)?;
    info!(books = books.len(), "read device manifest");

    let mut reports = Vec::with_capacity(books.len());
    for book in &books {
        let title = if book.title.is_empty() {
            book.lpath.clone()
        } else {
            book.title.clone()
        };

        let outcome = match sync_book(book, manifest_path, &mut library, options) {
            Ok(outcome) => outcome,
            Err(e) => BookOutcome::Failed(e.to_string()),
        };

        match &outcome {
            BookOutcome::Synced {
                found,
                upserts,
                deletes,
            } => {
                info!(title = %title, found = *found, upserts = *upserts, deletes = *deletes, "synced")
            }
            BookOutcome::NotFound => warn!(title = %title, "not in the Calibre library"),
            BookOutcome::NoEpub => warn!(title = %title, "library has no EPUB for this book"),
            BookOutcome::NoSidecar => info!(title = %title, "no sidecar on the device"),
            BookOutcome::NoAnnotations => info!(title = %title, "sidecar has no annotations"),
            BookOutcome::NoHighlights => info!(title = %title, "no convertible highlights"),
            BookOutcome::Failed(reason) => warn!(title = %title, %reason, "book failed"),
        }
        reports.push(BookReport { title, outcome });
    }

    let synced = reports
        .iter()
        .filter(|report| matches!(report.outcome, BookOutcome::Synced { .. }))
        .count();
    let failed = reports
        .iter()
        .filter(|report| matches!(report.outcome, BookOutcome::Failed(_)))
        .count();
    info!(books = reports.len(), synced, failed, "sync finished");

    Ok(reports)
}

fn sync_book(
    book: &DeviceBook,
    manifest_path: &Path,
    library: &mut CalibreLibrary,
    options: SyncOptions,
) -> Result<BookOutcome> {
    let Some(book_id) = book.application_id else {
        return Ok(BookOutcome::NotFound);
    };
    if !library.has_book(book_id)? {
        return Ok(BookOutcome::NotFound);
    }

    let sidecar = sidecar_path(manifest_path, &book.lpath);
    if !sidecar.is_file() {
        return Ok(BookOutcome::NoSidecar);
    }
    let annotations = read_sidecar(&sidecar)?;
    if annotations.is_empty() {
        return Ok(BookOutcome::NoAnnotations);
    }

    let Some(epub) = library.epub_path(book_id)? else {
        return Ok(BookOutcome::NoEpub);
    };
    let mut container = EpubContainer::open(&epub)?;

    let mut rng = rand::rng();
    let mut highlights = Vec::new();
    for annotation in &annotations {
        let mut resolve = |position: &str| resolve_position(&mut container, position);
        if let Some(highlight) = synthesize(annotation, &mut resolve, &mut rng, Utc::now()) {
            highlights.push(highlight);
        }
    }
    if highlights.is_empty() {
        return Ok(BookOutcome::NoHighlights);
    }

    let stored = library.highlights(book_id, FORMAT)?;
    let found = annotations.len();
    let plan = reconcile(highlights, stored);
    let upserts = plan.upserts.len();
    let deletes = plan.delete_ids.len();

    if options.dry_run {
        debug!(book_id, "dry run, leaving the database untouched");
    } else {
        library.apply(book_id, FORMAT, &plan)?;
    }

    Ok(BookOutcome::Synced {
        found,
        upserts,
        deletes,
    })
}

/// Resolve one device position string to a CFI inside the book.
fn resolve_position<R: Read + Seek>(
    container: &mut EpubContainer<R>,
    position: &str,
) -> Result<SpinePoint> {
    let parsed = SourcePosition::parse(position)?;

    let spine_name = container
        .spine_names()
        .get(parsed.fragment_index)
        .cloned()
        .ok_or_else(|| {
            Error::Resolve(format!(
                "fragment {} beyond the spine ({} documents)",
                parsed.fragment_index + 1,
                container.spine_names().len()
            ))
        })?;
    let document = container.parsed(parsed.fragment_index)?;
    let cfi = position_to_cfi(document, &parsed)?;

    Ok(SpinePoint {
        cfi,
        spine_index: parsed.fragment_index,
        spine_name,
    })
}
