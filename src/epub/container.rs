//! EPUB container access.
//!
//! Opens the zip, follows `META-INF/container.xml` to the OPF package
//! document, and exposes the spine as an ordered list of archive paths with
//! lazily parsed fragment trees. Position fragment numbers index this spine.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

use crate::epub::dom::Document;
use crate::error::{Error, Result};
use crate::util::{decode_text, extract_xml_encoding, local_name};

/// An EPUB opened for position resolution.
pub struct EpubContainer<R: Read + Seek> {
    archive: ZipArchive<R>,
    spine: Vec<String>,
    cache: Vec<Option<Document>>,
}

impl EpubContainer<File> {
    /// Open an EPUB file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> EpubContainer<R> {
    /// Open an EPUB from any [`Read`] + [`Seek`] source.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        // 1. Find the OPF file path from container.xml
        let opf_path = find_opf_path(&mut archive)?;
        let opf_dir = Path::new(&opf_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        // 2. Read the manifest and spine from the OPF
        let opf_content = read_archive_file(&mut archive, &opf_path)?;
        let (manifest, spine_ids) = parse_opf(&opf_content)?;

        // 3. Resolve spine ids to archive paths
        let mut spine = Vec::with_capacity(spine_ids.len());
        for id in &spine_ids {
            if let Some(href) = manifest.get(id) {
                spine.push(resolve_path(&opf_dir, href));
            }
        }
        if spine.is_empty() {
            return Err(Error::InvalidEpub("spine is empty".into()));
        }

        let cache = spine.iter().map(|_| None).collect();
        Ok(EpubContainer {
            archive,
            spine,
            cache,
        })
    }

    /// Archive paths of the spine documents, in spine order.
    pub fn spine_names(&self) -> &[String] {
        &self.spine
    }

    /// The parsed tree for one spine document, cached after the first call.
    pub fn parsed(&mut self, index: usize) -> Result<&Document> {
        if index >= self.spine.len() {
            return Err(Error::Resolve(format!(
                "fragment {index} out of range ({} spine items)",
                self.spine.len()
            )));
        }

        let slot = &mut self.cache[index];
        match slot {
            Some(document) => Ok(document),
            None => {
                let bytes = read_archive_file_bytes(&mut self.archive, &self.spine[index])?;
                let text = decode_text(&bytes, extract_xml_encoding(&bytes));
                let document = Document::parse(&text)?;
                Ok(slot.insert(document))
            }
        }
    }
}

fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let container = read_archive_file(archive, "META-INF/container.xml")?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8(attr.value.to_vec())?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

/// Read manifest id -> href plus the spine's idrefs from the OPF.
fn parse_opf(content: &str) -> Result<(HashMap<String, String>, Vec<String>)> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut manifest = HashMap::new();
    let mut spine_ids = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"item" => {
                    let mut id = None;
                    let mut href = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"id" => id = Some(String::from_utf8(attr.value.to_vec())?),
                            b"href" => href = Some(String::from_utf8(attr.value.to_vec())?),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"idref" {
                            spine_ids.push(String::from_utf8(attr.value.to_vec())?);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Ok((manifest, spine_ids))
}

fn read_archive_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<String> {
    let bytes = read_archive_file_bytes(archive, path)?;
    Ok(decode_text(&bytes, extract_xml_encoding(&bytes)).into_owned())
}

fn read_archive_file_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>> {
    // Try direct lookup first
    match archive.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(zip::result::ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Fallback: try the percent-decoded path (manifest hrefs are often
    // percent-encoded while archive entries are not)
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| Error::InvalidEpub(format!("Invalid UTF-8 in path: {}", path)))?;

    let mut file = archive.by_name(&decoded)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn resolve_path(base: &str, href: &str) -> String {
    if base.is_empty() {
        href.to_string()
    } else {
        format!("{}/{}", base, href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn build_epub(fragments: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).expect("mimetype");
        zip.write_all(b"application/epub+zip").expect("mimetype body");

        zip.start_file("META-INF/container.xml", deflated)
            .expect("container.xml");
        zip.write_all(
            br#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        )
        .expect("container.xml body");

        let mut manifest = String::new();
        let mut spine = String::new();
        for (i, (name, _)) in fragments.iter().enumerate() {
            manifest.push_str(&format!(
                r#"<item id="doc{i}" href="{name}" media-type="application/xhtml+xml"/>"#
            ));
            spine.push_str(&format!(r#"<itemref idref="doc{i}"/>"#));
        }
        let opf = format!(
            r#"<?xml version="1.0"?><package xmlns="http://www.idpf.org/2007/opf" version="2.0"><manifest>{manifest}</manifest><spine>{spine}</spine></package>"#
        );
        zip.start_file("OEBPS/content.opf", deflated).expect("opf");
        zip.write_all(opf.as_bytes()).expect("opf body");

        for (name, body) in fragments {
            let decoded = percent_encoding::percent_decode_str(name)
                .decode_utf8()
                .expect("test fragment name");
            zip.start_file(format!("OEBPS/{decoded}"), deflated)
                .expect("fragment");
            zip.write_all(body.as_bytes()).expect("fragment body");
        }

        zip.finish().expect("finish epub")
    }

    #[test]
    fn test_spine_order_and_names() {
        let epub = build_epub(&[
            ("one.xhtml", "<html><body><p>1</p></body></html>"),
            ("two.xhtml", "<html><body><p>2</p></body></html>"),
        ]);
        let container = EpubContainer::from_reader(epub).expect("should open");
        assert_eq!(
            container.spine_names(),
            ["OEBPS/one.xhtml", "OEBPS/two.xhtml"]
        );
    }

    #[test]
    fn test_parsed_fragment() {
        let epub = build_epub(&[("ch.xhtml", "<html><body><p>Hello</p></body></html>")]);
        let mut container = EpubContainer::from_reader(epub).expect("should open");

        let doc = container.parsed(0).expect("should parse");
        assert_eq!(doc.tag(doc.root()), Some("html"));

        // Second call hits the cache
        let doc = container.parsed(0).expect("cached");
        assert_eq!(doc.tag(doc.root()), Some("html"));
    }

    #[test]
    fn test_fragment_out_of_range() {
        let epub = build_epub(&[("ch.xhtml", "<html><body/></html>")]);
        let mut container = EpubContainer::from_reader(epub).expect("should open");
        assert!(matches!(container.parsed(3), Err(Error::Resolve(_))));
    }

    #[test]
    fn test_percent_encoded_href() {
        let epub = build_epub(&[("Chapter%20One.xhtml", "<html><body><p>x</p></body></html>")]);
        let mut container = EpubContainer::from_reader(epub).expect("should open");

        assert_eq!(container.spine_names(), ["OEBPS/Chapter%20One.xhtml"]);
        let doc = container.parsed(0).expect("percent-decoded lookup");
        assert_eq!(doc.tag(doc.root()), Some("html"));
    }

    #[test]
    fn test_missing_container_xml() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("mimetype", options).expect("mimetype");
        zip.write_all(b"application/epub+zip").expect("body");
        let data = zip.finish().expect("finish");

        assert!(EpubContainer::from_reader(data).is_err());
    }
}
