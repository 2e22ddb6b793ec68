//! Front matter parsing for text sources.

use pagewright_types::{Attrs, Value};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontmatterError {
    #[error("Invalid YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Front matter must be a mapping, found {0}")]
    NotAMapping(&'static str),
}

static FRONTMATTER_REGEX: OnceLock<Regex> = OnceLock::new();

fn frontmatter_regex() -> &'static Regex {
    FRONTMATTER_REGEX.get_or_init(|| {
        Regex::new(r"(?s)^---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|$)(.*)$")
            .expect("front matter pattern is valid")
    })
}

/// Split a document into its YAML header and body, if it has a header
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let captures = frontmatter_regex().captures(content)?;
    let header = captures.get(1).map_or("", |m| m.as_str());
    Some((header, captures.get(2)?.as_str()))
}

/// Parse front matter into attributes.
///
/// Returns the attributes and the remaining body. A document without a
/// header yields no attributes and the full content as body.
///
/// # Example
///
/// ```
/// use pagewright_core::frontmatter::parse_frontmatter;
/// use pagewright_types::Value;
///
/// let content = "---\ntitle: My Post\ntags: [a, b]\n---\n# Hello World\n";
///
/// let (attrs, body) = parse_frontmatter(content).unwrap();
/// assert_eq!(attrs["title"], Value::from("My Post"));
/// assert!(body.trim().starts_with("# Hello World"));
/// ```
pub fn parse_frontmatter(content: &str) -> Result<(Attrs, String), FrontmatterError> {
    let Some((yaml, body)) = split_frontmatter(content) else {
        return Ok((Attrs::new(), content.to_string()));
    };
    if yaml.trim().is_empty() {
        return Ok((Attrs::new(), body.to_string()));
    }

    let parsed: serde_json::Value = serde_yaml::from_str(yaml)?;
    match Value::from(parsed) {
        Value::Map(attrs) => Ok((attrs, body.to_string())),
        Value::Null => Ok((Attrs::new(), body.to_string())),
        other => Err(FrontmatterError::NotAMapping(other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_frontmatter() {
        let content = r#"---
title: Test Post
description: A test post
date: 2025-01-01
layout: post
---

# Hello World

This is the content."#;

        let (attrs, body) = parse_frontmatter(content).unwrap();
        assert_eq!(attrs["title"], Value::from("Test Post"));
        assert_eq!(attrs["date"], Value::from("2025-01-01"));
        assert_eq!(attrs["layout"], Value::from("post"));
        assert!(body.contains("# Hello World"));
        assert!(body.contains("This is the content."));
    }

    #[test]
    fn test_parse_nested_values() {
        let content = r#"---
tags:
  - rust
  - programming
order: 3
draft: true
---

Content."#;

        let (attrs, _) = parse_frontmatter(content).unwrap();
        assert_eq!(attrs["tags"].as_array().unwrap().len(), 2);
        assert_eq!(attrs["order"], Value::from(3));
        assert_eq!(attrs["draft"], Value::from(true));
    }

    #[test]
    fn test_parse_no_frontmatter() {
        let content = "# Just Content\n\nNo frontmatter here.";
        let (attrs, body) = parse_frontmatter(content).unwrap();
        assert!(attrs.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn test_invalid_yaml() {
        let content = r#"---
title: Test
invalid yaml: [unclosed
---

Content."#;

        assert!(parse_frontmatter(content).is_err());
    }

    #[test]
    fn test_header_closed_at_end_of_file() {
        let (attrs, body) = parse_frontmatter("---\ntitle: Only data\n---").unwrap();
        assert_eq!(attrs["title"], Value::from("Only data"));
        assert_eq!(body, "");
    }

    #[test]
    fn test_empty_header() {
        let (attrs, body) = parse_frontmatter("---\n---\n# Body\n").unwrap();
        assert!(attrs.is_empty());
        assert_eq!(body, "# Body\n");

        let (attrs, body) = parse_frontmatter("---\n---").unwrap();
        assert!(attrs.is_empty());
        assert_eq!(body, "");
    }

    #[test]
    fn test_scalar_header_is_rejected() {
        let content = "---\njust a string\n---\nbody";
        assert!(matches!(
            parse_frontmatter(content),
            Err(FrontmatterError::NotAMapping("string"))
        ));
    }
}
