//! Access to a Calibre library directory.
//!
//! A library is a directory with a `metadata.db` SQLite database at its
//! root and one subdirectory per book. Highlights live in the
//! `annotations` table; book files are located through `books.path` and
//! `data.name`.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use crate::error::{Error, Result};
use crate::merge::{MergePlan, StoredHighlight};

pub struct CalibreLibrary {
    root: PathBuf,
    conn: Connection,
}

impl CalibreLibrary {
    /// Open the library rooted at `root`.
    ///
    /// Fails if `root` has no `metadata.db`. Opening through SQLite alone
    /// would silently create an empty database where none existed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let db_path = root.join("metadata.db");
        if !db_path.is_file() {
            return Err(Error::Library(format!(
                "no metadata.db under {}",
                root.display()
            )));
        }
        let conn = Connection::open(&db_path)?;
        Ok(CalibreLibrary { root, conn })
    }

    pub fn has_book(&self, book_id: i64) -> Result<bool> {
        let row = self
            .conn
            .query_row("SELECT id FROM books WHERE id = ?1", [book_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        Ok(row.is_some())
    }

    /// Absolute path of the book's EPUB file, if the library holds one.
    pub fn epub_path(&self, book_id: i64) -> Result<Option<PathBuf>> {
        let book_path = self
            .conn
            .query_row("SELECT path FROM books WHERE id = ?1", [book_id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        let Some(book_path) = book_path else {
            return Ok(None);
        };

        let name = self
            .conn
            .query_row(
                "SELECT name FROM data WHERE book = ?1 AND format = 'EPUB'",
                [book_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        Ok(Some(self.root.join(book_path).join(format!("{name}.epub"))))
    }

    /// The viewer's own highlights for one book and format, in row order.
    ///
    /// Rows whose `annot_data` no longer parses as JSON are logged and
    /// ignored rather than failing the whole book.
    pub fn highlights(&self, book_id: i64, format: &str) -> Result<Vec<StoredHighlight>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, annot_data FROM annotations
             WHERE book = ?1 AND format = ?2
               AND annot_type = 'highlight'
               AND user_type = 'local' AND user = 'viewer'
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![book_id, format], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut highlights = Vec::new();
        for row in rows {
            let (row_id, data) = row?;
            match serde_json::from_str(&data) {
                Ok(value) => highlights.push(StoredHighlight { row_id, data: value }),
                Err(e) => warn!(row_id, error = %e, "ignoring unreadable annotation data"),
            }
        }
        Ok(highlights)
    }

    /// Apply a merge plan in one transaction: delete superseded rows, then
    /// upsert the new highlights keyed on the viewer's unique annotation
    /// index.
    pub fn apply(&mut self, book_id: i64, format: &str, plan: &MergePlan) -> Result<()> {
        let tx = self.conn.transaction()?;

        for row_id in &plan.delete_ids {
            tx.execute("DELETE FROM annotations WHERE id = ?1", [row_id])?;
        }

        {
            let mut upsert = tx.prepare(
                "INSERT INTO annotations
                   (book, format, user_type, user, timestamp,
                    annot_id, annot_type, annot_data, searchable_text)
                 VALUES (?1, ?2, 'local', 'viewer', ?3, ?4, 'highlight', ?5, ?6)
                 ON CONFLICT (book, user_type, user, format, annot_id)
                 DO UPDATE SET timestamp = excluded.timestamp,
                               annot_data = excluded.annot_data,
                               searchable_text = excluded.searchable_text",
            )?;
            for highlight in &plan.upserts {
                let at = DateTime::parse_from_rfc3339(&highlight.timestamp)?;
                let epoch = at.timestamp_millis() as f64 / 1000.0;
                let data = serde_json::to_string(highlight)?;
                upsert.execute(params![
                    book_id,
                    format,
                    epoch,
                    highlight.uuid,
                    data,
                    highlight.highlighted_text,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibre::highlight::{Highlight, HighlightColor, HighlightStyle};
    use tempfile::TempDir;

    const SCHEMA: &str = "
        CREATE TABLE books (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL DEFAULT 'Unknown',
            path TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE data (
            id INTEGER PRIMARY KEY,
            book INTEGER NOT NULL,
            format TEXT NOT NULL COLLATE NOCASE,
            name TEXT NOT NULL
        );
        CREATE TABLE annotations (
            id INTEGER PRIMARY KEY,
            book INTEGER NOT NULL,
            format TEXT NOT NULL COLLATE NOCASE,
            user_type TEXT NOT NULL,
            user TEXT NOT NULL,
            timestamp REAL NOT NULL,
            annot_id TEXT NOT NULL,
            annot_type TEXT NOT NULL,
            annot_data TEXT NOT NULL,
            searchable_text TEXT NOT NULL DEFAULT ''
        );
        CREATE UNIQUE INDEX annot_uniq
            ON annotations (book, user_type, user, format, annot_id);
    ";

    fn scratch_library() -> (TempDir, CalibreLibrary) {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = Connection::open(dir.path().join("metadata.db")).expect("create db");
        conn.execute_batch(SCHEMA).expect("schema");
        drop(conn);
        let library = CalibreLibrary::open(dir.path()).expect("open library");
        (dir, library)
    }

    fn sample_highlight(uuid: &str, text: &str) -> Highlight {
        Highlight {
            annot_type: "highlight".to_string(),
            start_cfi: "/2/4/1:0".to_string(),
            end_cfi: "/2/4/1:9".to_string(),
            spine_index: 1,
            spine_name: "OEBPS/ch1.xhtml".to_string(),
            highlighted_text: text.to_string(),
            uuid: uuid.to_string(),
            timestamp: "2024-11-03T21:14:08.123Z".to_string(),
            style: HighlightStyle::color(HighlightColor::Yellow),
            toc_family_titles: vec!["Chapter One".to_string()],
        }
    }

    #[test]
    fn test_open_requires_metadata_db() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = CalibreLibrary::open(dir.path());
        assert!(matches!(result, Err(Error::Library(_))));
    }

    #[test]
    fn test_has_book() {
        let (_dir, library) = scratch_library();
        library
            .conn
            .execute(
                "INSERT INTO books (id, title, path) VALUES (7, 'A Book', 'Author/A Book (7)')",
                [],
            )
            .expect("insert");

        assert!(library.has_book(7).expect("query"));
        assert!(!library.has_book(8).expect("query"));
    }

    #[test]
    fn test_epub_path_joins_library_root() {
        let (dir, library) = scratch_library();
        library
            .conn
            .execute(
                "INSERT INTO books (id, title, path) VALUES (7, 'A Book', 'Author/A Book (7)')",
                [],
            )
            .expect("insert");
        library
            .conn
            .execute(
                "INSERT INTO data (book, format, name) VALUES (7, 'EPUB', 'A Book - Author')",
                [],
            )
            .expect("insert");

        let path = library.epub_path(7).expect("query").expect("epub");
        assert_eq!(
            path,
            dir.path()
                .join("Author/A Book (7)")
                .join("A Book - Author.epub")
        );
    }

    #[test]
    fn test_epub_path_missing_format() {
        let (_dir, library) = scratch_library();
        library
            .conn
            .execute(
                "INSERT INTO books (id, title, path) VALUES (7, 'A Book', 'Author/A Book (7)')",
                [],
            )
            .expect("insert");
        library
            .conn
            .execute(
                "INSERT INTO data (book, format, name) VALUES (7, 'MOBI', 'A Book - Author')",
                [],
            )
            .expect("insert");

        assert_eq!(library.epub_path(7).expect("query"), None);
        assert_eq!(library.epub_path(9).expect("query"), None);
    }

    #[test]
    fn test_highlights_filters_and_orders() {
        let (_dir, library) = scratch_library();
        let insert = "INSERT INTO annotations
            (book, format, user_type, user, timestamp, annot_id, annot_type, annot_data)
            VALUES (?1, ?2, ?3, ?4, 0.0, ?5, ?6, ?7)";

        for (book, format, user_type, user, annot_id, annot_type, data) in [
            (1, "EPUB", "local", "viewer", "keep-2", "highlight", r#"{"uuid":"keep-2"}"#),
            (1, "EPUB", "local", "viewer", "keep-1", "highlight", r#"{"uuid":"keep-1"}"#),
            (1, "EPUB", "local", "viewer", "bm", "bookmark", r#"{}"#),
            (1, "EPUB", "web", "viewer", "other-user-type", "highlight", r#"{}"#),
            (1, "EPUB", "local", "someone", "other-user", "highlight", r#"{}"#),
            (1, "MOBI", "local", "viewer", "other-format", "highlight", r#"{}"#),
            (2, "EPUB", "local", "viewer", "other-book", "highlight", r#"{}"#),
        ] {
            library
                .conn
                .execute(
                    insert,
                    params![book, format, user_type, user, annot_id, annot_type, data],
                )
                .expect("insert");
        }

        let stored = library.highlights(1, "EPUB").expect("query");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].uuid(), Some("keep-2"));
        assert_eq!(stored[1].uuid(), Some("keep-1"));
        assert!(stored[0].row_id < stored[1].row_id);
    }

    #[test]
    fn test_highlights_skips_unreadable_data() {
        let (_dir, library) = scratch_library();
        library
            .conn
            .execute(
                "INSERT INTO annotations
                    (book, format, user_type, user, timestamp, annot_id, annot_type, annot_data)
                 VALUES (1, 'EPUB', 'local', 'viewer', 0.0, 'bad', 'highlight', 'not json')",
                [],
            )
            .expect("insert");

        assert!(library.highlights(1, "EPUB").expect("query").is_empty());
    }

    #[test]
    fn test_apply_inserts_and_deletes() {
        let (_dir, mut library) = scratch_library();
        library
            .conn
            .execute(
                "INSERT INTO annotations
                    (book, format, user_type, user, timestamp, annot_id, annot_type, annot_data)
                 VALUES (1, 'EPUB', 'local', 'viewer', 0.0, 'stale', 'highlight', '{}')",
                [],
            )
            .expect("insert");
        let stale_id = library.conn.last_insert_rowid();

        let plan = MergePlan {
            upserts: vec![sample_highlight("fresh", "kept text")],
            delete_ids: vec![stale_id],
        };
        library.apply(1, "EPUB", &plan).expect("apply");

        let stored = library.highlights(1, "EPUB").expect("query");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].uuid(), Some("fresh"));

        let searchable: String = library
            .conn
            .query_row(
                "SELECT searchable_text FROM annotations WHERE annot_id = 'fresh'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(searchable, "kept text");
    }

    #[test]
    fn test_apply_upserts_on_annotation_id() {
        let (_dir, mut library) = scratch_library();

        let first = MergePlan {
            upserts: vec![sample_highlight("same-id", "before")],
            delete_ids: vec![],
        };
        library.apply(1, "EPUB", &first).expect("apply");

        let mut updated = sample_highlight("same-id", "after");
        updated.timestamp = "2024-12-01T00:00:00.000Z".to_string();
        let second = MergePlan {
            upserts: vec![updated],
            delete_ids: vec![],
        };
        library.apply(1, "EPUB", &second).expect("apply");

        let stored = library.highlights(1, "EPUB").expect("query");
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].data["highlighted_text"],
            serde_json::json!("after")
        );

        let epoch: f64 = library
            .conn
            .query_row(
                "SELECT timestamp FROM annotations WHERE annot_id = 'same-id'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert!((epoch - 1733011200.0).abs() < 0.001);
    }

    #[test]
    fn test_apply_stores_epoch_seconds() {
        let (_dir, mut library) = scratch_library();
        let plan = MergePlan {
            upserts: vec![sample_highlight("t", "text")],
            delete_ids: vec![],
        };
        library.apply(1, "EPUB", &plan).expect("apply");

        let epoch: f64 = library
            .conn
            .query_row("SELECT timestamp FROM annotations", [], |row| row.get(0))
            .expect("query");
        // 2024-11-03T21:14:08.123Z
        assert!((epoch - 1730668448.123).abs() < 0.001);
    }
}
