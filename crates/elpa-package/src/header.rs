//! Parsing of single-file packages: an Emacs Lisp library whose leading
//! comment block follows the standard library header conventions.
//!
//! ```text
//! ;;; foo.el --- Frobnicate buffers  -*- lexical-binding: t -*-
//! ;; Version: 1.2
//! ;; Package-Requires: ((emacs "25.1") (dash "2.0"))
//! ;;; Commentary:
//! ;; Longer description.
//! ;;; Code:
//! ...
//! ;;; foo.el ends here
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::descriptor::{parse_requirements, PackageDescriptor, PackageKind};
use crate::error::{PackageError, Result};
use crate::sexp::{self, is_balanced};
use crate::version::Version;

fn first_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^;;;+\s*([^\s/]+)\.el\s+---\s*(.*?)\s*(?:-\*-.*-\*-)?\s*$")
            .expect("header line regex should compile")
    })
}

fn header_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^;+\s*([A-Za-z][A-Za-z0-9-]*)\s*:\s*(.*?)\s*$")
            .expect("header field regex should compile")
    })
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^;;;+\s*([A-Za-z][A-Za-z -]*?)\s*:?\s*$").expect("section regex should compile")
    })
}

/// Parses the header of a single-file package.
///
/// Fails with [`PackageError::MissingTerminator`] when the file does not end
/// with `;;; <name>.el ends here`; the rest of the header may still be
/// recoverable by the caller.
pub fn parse_single_file(source: &str) -> Result<PackageDescriptor> {
    let (name, summary) = header_line(source).ok_or(PackageError::MissingHeader)?;

    if !has_terminator(source, &name) {
        return Err(PackageError::MissingTerminator { name });
    }

    let fields = header_fields(source);
    let version = fields
        .get("package-version")
        .or_else(|| fields.get("version"))
        .ok_or_else(|| PackageError::MissingVersion { name: name.clone() })?;
    let version = Version::parse(version)?;

    let requirements = match fields.get("package-requires") {
        Some(text) => parse_requirements(&sexp::read(text)?)?,
        None => Vec::new(),
    };

    Ok(PackageDescriptor {
        name,
        version,
        requirements,
        summary,
        kind: PackageKind::SingleFile,
        commentary: commentary(source),
    })
}

/// Returns `(name, summary)` from the `;;; name.el --- summary` line.
pub fn header_line(source: &str) -> Option<(String, String)> {
    let line = source.lines().find(|line| !line.trim().is_empty())?;
    let captures = first_line_re().captures(line.trim_end())?;
    Some((captures[1].to_owned(), captures[2].to_owned()))
}

/// The line the package library expects at the end of a single-file package.
pub fn terminator_line(name: &str) -> String {
    format!(";;; {name}.el ends here")
}

fn has_terminator(source: &str, name: &str) -> bool {
    let expected = format!("{name}.el ends here");
    source.lines().any(|line| {
        let line = line.trim();
        line.starts_with(";;;") && line.trim_start_matches(';').trim() == expected
    })
}

/// Extracts the text of the `;;; Commentary:` section with comment markers
/// stripped, or `None` when the section is missing or empty.
pub fn commentary(source: &str) -> Option<String> {
    let mut lines = source.lines();
    lines.find(|line| {
        section_re()
            .captures(line.trim_end())
            .is_some_and(|caps| caps[1].eq_ignore_ascii_case("commentary"))
    })?;

    let mut out: Vec<&str> = Vec::new();
    for line in lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with(";;;") && section_re().is_match(trimmed.trim_end()) {
            break;
        }
        if !trimmed.is_empty() && !trimmed.starts_with(';') {
            break;
        }
        let text = trimmed.trim_start_matches(';');
        out.push(text.strip_prefix(' ').unwrap_or(text).trim_end());
    }

    while out.first().is_some_and(|line| line.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|line| line.is_empty()) {
        out.pop();
    }
    if out.is_empty() {
        return None;
    }
    Some(out.join("\n"))
}

// Fields are read from the comment block before `;;; Code:`. The first
// occurrence of a field wins. `Package-Requires` may continue onto following
// comment lines until its parentheses balance.
fn header_fields(source: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut lines = source.lines().skip_while(|line| line.trim().is_empty()).skip(1);

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if is_code_section(trimmed) {
            break;
        }
        let Some(captures) = header_field_re().captures(trimmed) else {
            continue;
        };
        let key = captures[1].to_ascii_lowercase();
        let mut value = captures[2].to_owned();

        if key == "package-requires" {
            while !is_balanced(&value) {
                let Some(next) = lines.next() else {
                    break;
                };
                let next = next.trim();
                if !next.starts_with(';') || is_code_section(next) {
                    break;
                }
                value.push(' ');
                value.push_str(next.trim_start_matches(';').trim());
            }
        }

        fields.entry(key).or_insert(value);
    }
    fields
}

fn is_code_section(line: &str) -> bool {
    line.starts_with(";;;")
        && section_re()
            .captures(line)
            .is_some_and(|caps| caps[1].eq_ignore_ascii_case("code"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOO: &str = r#";;; foo.el --- Frobnicate buffers  -*- lexical-binding: t -*-

;; Copyright (C) 2024 Someone

;; Author: Someone <someone@example.com>
;; Version: 1.2
;; Package-Requires: ((emacs "25.1")
;;                    (dash "2.0"))
;; Keywords: convenience

;;; Commentary:

;; Frobnicates the current buffer.
;;
;; Use `foo-frob'.

;;; Code:

(defun foo-frob () nil)

(provide 'foo)
;;; foo.el ends here
"#;

    #[test]
    fn parses_full_header() {
        let desc = parse_single_file(FOO).unwrap();
        assert_eq!(desc.name, "foo");
        assert_eq!(desc.summary, "Frobnicate buffers");
        assert_eq!(desc.version.components(), &[1, 2]);
        assert_eq!(desc.kind, PackageKind::SingleFile);
        let names: Vec<_> = desc.requirements.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["emacs", "dash"]);
        assert_eq!(
            desc.commentary.as_deref(),
            Some("Frobnicates the current buffer.\n\nUse `foo-frob'.")
        );
    }

    #[test]
    fn package_version_takes_priority() {
        let source = FOO.replace(";; Version: 1.2", ";; Package-Version: 3.0\n;; Version: 1.2");
        let desc = parse_single_file(&source).unwrap();
        assert_eq!(desc.version.components(), &[3, 0]);
    }

    #[test]
    fn missing_terminator_is_reported_with_name() {
        let source = FOO.replace(";;; foo.el ends here", "");
        match parse_single_file(&source) {
            Err(PackageError::MissingTerminator { name }) => assert_eq!(name, "foo"),
            other => panic!("expected MissingTerminator, got {other:?}"),
        }
    }

    #[test]
    fn missing_header_and_version_are_errors() {
        assert!(matches!(
            parse_single_file("(defun x () nil)\n"),
            Err(PackageError::MissingHeader)
        ));
        let source = FOO.replace(";; Version: 1.2\n", "");
        assert!(matches!(
            parse_single_file(&source),
            Err(PackageError::MissingVersion { .. })
        ));
    }

    #[test]
    fn fields_after_code_section_are_ignored() {
        let source = FOO.replace(";; Version: 1.2\n", "").replace(
            "(defun foo-frob () nil)",
            ";; Version: 9.9\n(defun foo-frob () nil)",
        );
        assert!(matches!(
            parse_single_file(&source),
            Err(PackageError::MissingVersion { .. })
        ));
    }

    #[test]
    fn commentary_is_optional() {
        assert_eq!(commentary(";;; x.el --- X\n;;; Code:\n"), None);
        assert_eq!(commentary(";;; Commentary:\n\n;;; Code:\n"), None);
    }
}
