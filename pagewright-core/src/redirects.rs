//! Redirect rules.
//!
//! One rule per line: `from to [status]`. Blank lines and `#` comments are
//! skipped. A `/:name` segment in `from` captures that segment, and both
//! `{name}` and `/:name` in `to` are replaced by the captured value. Rules
//! without parameters match by exact string equality. The first match wins.

use crate::fs::Filesystem;
use regex::Regex;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_STATUS: u16 = 301;

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("line {line}: invalid pattern `{pattern}`: {message}")]
    Pattern {
        line: usize,
        pattern: String,
        message: String,
    },

    #[error("line {line}: invalid status `{value}`")]
    Status { line: usize, value: String },
}

#[derive(Debug, Clone)]
pub struct Redirect {
    pub from: String,
    pub to: String,
    pub status: u16,
    pattern: Option<(Regex, Vec<String>)>,
}

impl Redirect {
    fn compile(line: usize, from: &str, to: &str, status: u16) -> Result<Self, RedirectError> {
        let pattern_error = |message: String| RedirectError::Pattern {
            line,
            pattern: from.to_string(),
            message,
        };

        let mut names = Vec::new();
        let mut regex = String::from("^");
        for (i, segment) in from.split('/').enumerate() {
            if i > 0 {
                regex.push('/');
            }
            match segment.strip_prefix(':') {
                Some(name) => {
                    let valid = name
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                    if !valid {
                        return Err(pattern_error(format!("bad parameter name `{}`", name)));
                    }
                    if names.iter().any(|n| n == name) {
                        return Err(pattern_error(format!("duplicate parameter `{}`", name)));
                    }
                    regex.push_str(&format!("(?P<{}>[^/]+)", name));
                    names.push(name.to_string());
                }
                None => regex.push_str(&regex::escape(segment)),
            }
        }
        regex.push('$');

        let pattern = if names.is_empty() {
            None
        } else {
            let compiled = Regex::new(&regex).map_err(|e| pattern_error(e.to_string()))?;
            Some((compiled, names))
        };

        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            status,
            pattern,
        })
    }

    /// Destination for `path`, if this rule matches it
    pub fn apply(&self, path: &str) -> Option<String> {
        let Some((regex, names)) = &self.pattern else {
            return (path == self.from).then(|| self.to.clone());
        };

        let captures = regex.captures(path)?;
        let mut destination = self.to.clone();
        for name in names {
            let value = captures.name(name).map(|m| m.as_str()).unwrap_or_default();
            destination = destination.replace(&format!("{{{}}}", name), value);
            let replaced = destination
                .split('/')
                .map(|segment| {
                    if segment.strip_prefix(':') == Some(name.as_str()) {
                        value
                    } else {
                        segment
                    }
                })
                .collect::<Vec<_>>()
                .join("/");
            destination = replaced;
        }
        Some(destination)
    }
}

/// An ordered set of redirect rules
#[derive(Debug, Clone, Default)]
pub struct Redirects {
    rules: Vec<Redirect>,
}

impl Redirects {
    pub fn parse(text: &str) -> Result<Self, RedirectError> {
        let mut rules = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                tracing::warn!("Ignoring redirect rule on line {}: {}", index + 1, line);
                continue;
            }
            let status = match parts.get(2) {
                Some(value) => value.parse::<u16>().map_err(|_| RedirectError::Status {
                    line: index + 1,
                    value: value.to_string(),
                })?,
                None => DEFAULT_STATUS,
            };
            rules.push(Redirect::compile(index + 1, parts[0], parts[1], status)?);
        }
        Ok(Self { rules })
    }

    /// Load rules through the filesystem adapter; a missing file means no rules
    pub async fn load(fs: &dyn Filesystem, path: &Path) -> Result<Self, RedirectError> {
        if !fs.exists(path).await {
            return Ok(Self::default());
        }
        match fs.read(path).await {
            Some(text) => Self::parse(&text),
            None => Ok(Self::default()),
        }
    }

    /// First matching rule's destination and status
    pub fn matches(&self, path: &str) -> Option<(String, u16)> {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(path).map(|to| (to, rule.status)))
    }

    pub fn rules(&self) -> &[Redirect] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromStr for Redirects {
    type Err = RedirectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
# moved sections
/old/:id   /new/{id}   302
/a         /b
/docs/:section/:page  /guide/:section/{page}

/broken
"#;

    #[test]
    fn test_parameterised_rule() {
        let redirects: Redirects = RULES.parse().unwrap();
        assert_eq!(redirects.len(), 3);
        assert_eq!(
            redirects.matches("/old/42"),
            Some(("/new/42".to_string(), 302))
        );
        assert_eq!(redirects.matches("/old/42/extra"), None);
    }

    #[test]
    fn test_literal_rule_is_exact() {
        let redirects: Redirects = RULES.parse().unwrap();
        assert_eq!(redirects.matches("/a"), Some(("/b".to_string(), 301)));
        assert_eq!(redirects.matches("/a/"), None);
        assert_eq!(redirects.matches("/ab"), None);
    }

    #[test]
    fn test_both_substitution_forms() {
        let redirects: Redirects = RULES.parse().unwrap();
        assert_eq!(
            redirects.matches("/docs/setup/install"),
            Some(("/guide/setup/install".to_string(), 301))
        );
    }

    #[test]
    fn test_first_rule_wins() {
        let redirects: Redirects = "/x /first\n/x /second 307\n".parse().unwrap();
        assert_eq!(redirects.matches("/x"), Some(("/first".to_string(), 301)));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let redirects: Redirects = "/v1.0/:page /v2/{page}\n".parse().unwrap();
        assert_eq!(redirects.matches("/v1x0/a"), None);
        assert!(redirects.matches("/v1.0/a").is_some());
    }

    #[test]
    fn test_invalid_rules() {
        assert!(matches!(
            "/a/:1bad /b".parse::<Redirects>(),
            Err(RedirectError::Pattern { line: 1, .. })
        ));
        assert!(matches!(
            "/a /b permanent".parse::<Redirects>(),
            Err(RedirectError::Status { .. })
        ));
    }
}
