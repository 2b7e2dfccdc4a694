//! KOReader position strings.
//!
//! KOReader records each highlight endpoint as an xpointer-like string:
//!
//! ```text
//! /body/DocFragment[7]/body/div/p[3]/text()[2].161
//! ```
//!
//! `DocFragment[n]` selects the n-th spine document (1-based), the middle
//! steps walk elements down from the XHTML root, `text()[k]` picks the k-th
//! text run under the final element, and the trailing number is a character
//! offset into that run.

use crate::error::{Error, Result};

/// One element step in a position path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    /// Tag name, matched against namespace-stripped element names.
    pub name: String,
    /// 1-based index among same-tag element siblings, when given.
    pub index: Option<usize>,
}

/// A parsed KOReader position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    /// 0-based spine index (the position string is 1-based).
    pub fragment_index: usize,
    /// Element steps below the document root.
    pub path: Vec<PathStep>,
    /// 1-based text-run index, when given.
    pub text_index: Option<usize>,
    /// Character offset into the addressed run, in Unicode scalar values.
    pub offset: usize,
}

impl SourcePosition {
    /// Parse a position string.
    ///
    /// The whole input must match the grammar; KOReader writes these strings
    /// mechanically, so leading or trailing garbage means corrupt data and is
    /// rejected rather than guessed at.
    pub fn parse(input: &str) -> Result<SourcePosition> {
        let err = |message: &str| Error::Position(format!("{message} in {input:?}"));

        let rest = input
            .strip_prefix("/body/DocFragment[")
            .ok_or_else(|| err("expected /body/DocFragment[ prefix"))?;
        let (fragment, rest) =
            take_number(rest).ok_or_else(|| err("expected fragment number"))?;
        if fragment == 0 {
            return Err(err("fragment numbers are 1-based"));
        }
        let rest = rest
            .strip_prefix(']')
            .ok_or_else(|| err("expected ] after fragment number"))?;

        // The final /text() marks the end of the element path
        let text_at = rest.rfind("/text()").ok_or_else(|| err("expected /text()"))?;
        let (path_part, rest) = rest.split_at(text_at);
        let mut rest = &rest["/text()".len()..];

        let mut text_index = None;
        if let Some(inner) = rest.strip_prefix('[') {
            let (index, inner) = take_number(inner).ok_or_else(|| err("expected text index"))?;
            if index == 0 {
                return Err(err("text indexes are 1-based"));
            }
            rest = inner
                .strip_prefix(']')
                .ok_or_else(|| err("expected ] after text index"))?;
            text_index = Some(index);
        }

        let rest = rest.strip_prefix('.').ok_or_else(|| err("expected .offset"))?;
        let (offset, rest) = take_number(rest).ok_or_else(|| err("expected offset"))?;
        if !rest.is_empty() {
            return Err(err("unexpected trailing characters"));
        }

        let mut path = Vec::new();
        for segment in path_part.split('/') {
            // Interior text() steps carry no element information
            if segment.is_empty() || segment == "text()" {
                continue;
            }
            let step = if let Some((name, bracket)) = segment.split_once('[') {
                let inner = bracket
                    .strip_suffix(']')
                    .ok_or_else(|| err("expected ] after step index"))?;
                let index: usize = inner.parse().map_err(|_| err("expected step index"))?;
                if index == 0 {
                    return Err(err("step indexes are 1-based"));
                }
                if !valid_name(name) {
                    return Err(err("invalid step name"));
                }
                PathStep {
                    name: name.to_string(),
                    index: Some(index),
                }
            } else {
                if !valid_name(segment) {
                    return Err(err("invalid step name"));
                }
                PathStep {
                    name: segment.to_string(),
                    index: None,
                }
            };
            path.push(step);
        }

        Ok(SourcePosition {
            fragment_index: fragment - 1,
            path,
            text_index,
            offset,
        })
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['[', ']', '(', ')'])
}

/// Take a leading run of ASCII digits, returning the value and the rest.
fn take_number(input: &str) -> Option<(usize, &str)> {
    let end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    let value = input[..end].parse().ok()?;
    Some((value, &input[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step(name: &str, index: Option<usize>) -> PathStep {
        PathStep {
            name: name.to_string(),
            index,
        }
    }

    #[test]
    fn test_parse_full_position() {
        let pos = SourcePosition::parse("/body/DocFragment[7]/body/div/p[3]/text()[2].161")
            .expect("should parse");
        assert_eq!(pos.fragment_index, 6);
        assert_eq!(
            pos.path,
            vec![step("body", None), step("div", None), step("p", Some(3))]
        );
        assert_eq!(pos.text_index, Some(2));
        assert_eq!(pos.offset, 161);
    }

    #[test]
    fn test_parse_without_text_index() {
        let pos =
            SourcePosition::parse("/body/DocFragment[1]/body/p/text().0").expect("should parse");
        assert_eq!(pos.fragment_index, 0);
        assert_eq!(pos.path, vec![step("body", None), step("p", None)]);
        assert_eq!(pos.text_index, None);
        assert_eq!(pos.offset, 0);
    }

    #[test]
    fn test_parse_empty_path() {
        let pos = SourcePosition::parse("/body/DocFragment[2]/text().5").expect("should parse");
        assert_eq!(pos.fragment_index, 1);
        assert!(pos.path.is_empty());
        assert_eq!(pos.offset, 5);
    }

    #[test]
    fn test_interior_text_step_dropped() {
        let pos = SourcePosition::parse("/body/DocFragment[3]/body/text()/div/text().4")
            .expect("should parse");
        assert_eq!(pos.path, vec![step("body", None), step("div", None)]);
        assert_eq!(pos.text_index, None);
        assert_eq!(pos.offset, 4);
    }

    #[test]
    fn test_rejects_malformed_positions() {
        for bad in [
            "",
            "/body/div/text().0",
            "body/DocFragment[1]/p/text().0",
            "x/body/DocFragment[1]/p/text().0",
            "/body/DocFragment[]/p/text().0",
            "/body/DocFragment[0]/p/text().0",
            "/body/DocFragment[1]/p/text()",
            "/body/DocFragment[1]/p/text().",
            "/body/DocFragment[1]/p/text().5x",
            "/body/DocFragment[1]/p/text()[0].5",
            "/body/DocFragment[1]/p[0]/text().5",
            "/body/DocFragment[1]/p[2/text().5",
            "/body/DocFragment[1]/p]q/text().5",
        ] {
            assert!(
                SourcePosition::parse(bad).is_err(),
                "should reject {bad:?}"
            );
        }
    }

    proptest! {
        #[test]
        fn prop_generated_positions_roundtrip(
            fragment in 1usize..400,
            segments in prop::collection::vec(("[a-z]{1,8}", prop::option::of(1usize..20)), 0..6),
            text_index in prop::option::of(1usize..10),
            offset in 0usize..10_000,
        ) {
            let mut s = format!("/body/DocFragment[{fragment}]");
            for (name, index) in &segments {
                s.push('/');
                s.push_str(name);
                if let Some(i) = index {
                    s.push_str(&format!("[{i}]"));
                }
            }
            s.push_str("/text()");
            if let Some(k) = text_index {
                s.push_str(&format!("[{k}]"));
            }
            s.push_str(&format!(".{offset}"));

            let parsed = SourcePosition::parse(&s).expect("generated positions parse");
            prop_assert_eq!(parsed.fragment_index, fragment - 1);
            prop_assert_eq!(parsed.path.len(), segments.len());
            for (got, (name, index)) in parsed.path.iter().zip(&segments) {
                prop_assert_eq!(&got.name, name);
                prop_assert_eq!(got.index, *index);
            }
            prop_assert_eq!(parsed.text_index, text_index);
            prop_assert_eq!(parsed.offset, offset);
        }
    }
}
