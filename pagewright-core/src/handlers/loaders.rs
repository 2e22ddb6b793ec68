use crate::frontmatter::parse_frontmatter;
use crate::handler::{Advance, BuildContext, Handler, HandlerError};
use crate::record::{Content, PageRecord};
use async_trait::async_trait;
use pagewright_types::{Attrs, Value};
use std::path::Path;

const DATA_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];
const FRONTMATTER_EXTENSIONS: &[&str] = &["md", "markdown", "html", "htm"];

async fn read_source(cx: &BuildContext, record: &PageRecord) -> Result<String, HandlerError> {
    cx.fs
        .read(&record.filename)
        .await
        .ok_or_else(|| HandlerError::Unreadable(record.filename.clone()))
}

/// Parse a structured data file into attributes
pub fn parse_data(path: &Path, text: &str) -> Result<Attrs, HandlerError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let parse_error = |message: String| HandlerError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let parsed: serde_json::Value = match ext.as_str() {
        "json" => serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        "yaml" | "yml" => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        "toml" => toml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        other => return Err(parse_error(format!("unsupported data format `{}`", other))),
    };

    match Value::from(parsed) {
        Value::Map(attrs) => Ok(attrs),
        Value::Null => Ok(Attrs::new()),
        other => Err(parse_error(format!(
            "expected a mapping, found {}",
            other.type_name()
        ))),
    }
}

/// Overlays JSON, YAML or TOML data onto the record
pub struct DataLoader;

#[async_trait]
impl Handler for DataLoader {
    fn name(&self) -> &str {
        "data"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        !record.is_loaded() && record.has_extension(DATA_EXTENSIONS)
    }

    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let text = read_source(cx, record).await?;
        let data = parse_data(&record.filename, &text)?;

        let mut next = record.clone();
        next.attrs.extend(data);
        next.mark_loaded();
        Ok(Some(Advance::One(next)))
    }
}

/// Splits YAML front matter from a text document
pub struct FrontmatterLoader;

#[async_trait]
impl Handler for FrontmatterLoader {
    fn name(&self) -> &str {
        "frontmatter"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        !record.is_loaded() && record.has_extension(FRONTMATTER_EXTENSIONS)
    }

    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let text = read_source(cx, record).await?;
        let (attrs, body) = parse_frontmatter(&text).map_err(|e| HandlerError::Parse {
            path: record.filename.clone(),
            message: e.to_string(),
        })?;

        let mut next = record.clone();
        next.attrs.extend(attrs);
        next.content = Some(Content::Text(body));
        next.mark_loaded();
        Ok(Some(Advance::One(next)))
    }
}

/// Reads any other file verbatim
pub struct ReadFile;

#[async_trait]
impl Handler for ReadFile {
    fn name(&self) -> &str {
        "read-file"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        !record.is_loaded()
    }

    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let text = read_source(cx, record).await?;
        let mut next = record.clone();
        next.content = Some(Content::Text(text));
        next.mark_loaded();
        Ok(Some(Advance::One(next)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_each_format() {
        let json = parse_data(Path::new("a.json"), r#"{"title": "J"}"#).unwrap();
        assert_eq!(json["title"], Value::from("J"));

        let yaml = parse_data(Path::new("_data.yml"), "title: Y\ntags: [a]\n").unwrap();
        assert_eq!(yaml["tags"].as_array().unwrap().len(), 1);

        let toml = parse_data(Path::new("a.toml"), "title = \"T\"\n[site]\nlang = \"en\"\n").unwrap();
        assert_eq!(toml["site"].as_map().unwrap()["lang"], Value::from("en"));
    }

    #[test]
    fn test_non_mapping_is_rejected() {
        let err = parse_data(&PathBuf::from("list.json"), "[1, 2]").unwrap_err();
        assert!(err.to_string().contains("expected a mapping"));
    }

    #[test]
    fn test_loaders_claim_once() {
        let mut record = PageRecord::new("pages/post.md", Attrs::new());
        assert!(FrontmatterLoader.claims(&record));
        assert!(ReadFile.claims(&record));
        assert!(!DataLoader.claims(&record));

        record.mark_loaded();
        assert!(!FrontmatterLoader.claims(&record));
        assert!(!ReadFile.claims(&record));
    }
}
