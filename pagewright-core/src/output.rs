//! Rendering boundary and output writer.

use crate::handler::{BuildContext, HandlerError};
use crate::layout::materialize;
use crate::record::{Content, PageRecord, RenderProps};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const DOCTYPE: &str = "<!DOCTYPE html>";

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("failed to render {url}: {source}")]
    Render {
        url: String,
        #[source]
        source: HandlerError,
    },

    #[error("output path escapes the output directory: {0}")]
    UnsafePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Prefix HTML documents with a doctype unless they already carry one
pub fn finalize_document(output_path: &str, content: String) -> String {
    let is_document = output_path.to_ascii_lowercase().ends_with(".html");
    let has_doctype = content
        .trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("<!doctype"));
    if is_document && !has_doctype {
        format!("{}{}", DOCTYPE, content)
    } else {
        content
    }
}

/// Guess a content type from a path's extension
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Render a record's content to a string, calling lazy producers as needed
pub async fn render_content(cx: &BuildContext, record: &PageRecord) -> Result<Option<String>, HandlerError> {
    let Some(content) = record.content.clone() else {
        return Ok(None);
    };
    let props = RenderProps {
        record: record.clone(),
        children: None,
        search: cx.search(),
    };
    match materialize(content, props).await? {
        Content::Text(text) => Ok(Some(text)),
        Content::Node(node) => Ok(Some(node.render_html())),
        other => Err(HandlerError::Invalid(format!(
            "{} still holds {} content",
            record.filename.display(),
            other.kind()
        ))),
    }
}

/// Render a published page for serving or writing
pub async fn render_page(cx: &BuildContext, record: &PageRecord) -> Result<Option<String>, HandlerError> {
    let Some(body) = render_content(cx, record).await? else {
        return Ok(None);
    };
    let output_path = record.output_path().or(record.url()).unwrap_or_default();
    Ok(Some(finalize_document(output_path, body)))
}

/// Map an output path onto the output directory
pub fn output_file(output_dir: &Path, output_path: &str) -> Result<PathBuf, OutputError> {
    let relative = Path::new(output_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(OutputError::UnsafePath(output_path.to_string()));
    }
    Ok(output_dir.join(relative))
}

/// Write every published page with content under `output_dir`
pub async fn write_pages(cx: &BuildContext, output_dir: &Path) -> Result<usize, OutputError> {
    let mut written = 0;
    for record in cx.pages.snapshot() {
        let Some(output_path) = record.output_path().map(str::to_string) else {
            tracing::debug!("Skipping {}: no output path", record.filename.display());
            continue;
        };
        let url = record.url().unwrap_or_default().to_string();
        let body = render_page(cx, &record)
            .await
            .map_err(|source| OutputError::Render { url, source })?;
        let Some(body) = body else {
            tracing::debug!("Skipping {}: no content", record.filename.display());
            continue;
        };

        let target = output_file(output_dir, &output_path)?;
        cx.fs.write(&target, &body).await?;
        tracing::debug!("Wrote {}", target.display());
        written += 1;
    }
    Ok(written)
}

/// Copy the static directory into the output directory
pub fn copy_static(static_dir: &Path, output_dir: &Path) -> Result<usize, OutputError> {
    if !static_dir.exists() {
        return Ok(0);
    }

    let mut copied = 0;
    for entry in WalkDir::new(static_dir) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(static_dir) else {
            continue;
        };
        let target = output_dir.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_doctype_added_to_html() {
        let out = finalize_document("/index.html", "<html></html>".to_string());
        assert_eq!(out, "<!DOCTYPE html><html></html>");
    }

    #[test]
    fn test_doctype_not_duplicated() {
        let out = finalize_document("/index.html", "<!doctype html><html></html>".to_string());
        assert_eq!(out, "<!doctype html><html></html>");
    }

    #[test]
    fn test_non_documents_untouched() {
        let out = finalize_document("/style.css", "body{}".to_string());
        assert_eq!(out, "body{}");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for_path("/a/index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for_path("/sitemap.xml"), "application/xml");
        assert_eq!(content_type_for_path("/blob"), "application/octet-stream");
    }

    #[test]
    fn test_output_file_rejects_traversal() {
        let dir = Path::new("/site/out");
        assert_eq!(
            output_file(dir, "/blog/index.html").unwrap(),
            PathBuf::from("/site/out/blog/index.html")
        );
        assert!(matches!(
            output_file(dir, "/../etc/passwd"),
            Err(OutputError::UnsafePath(_))
        ));
    }

    #[test]
    fn test_copy_static() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("static");
        std::fs::create_dir_all(src.join("img")).unwrap();
        std::fs::write(src.join("style.css"), "body{}").unwrap();
        std::fs::write(src.join("img/logo.svg"), "<svg/>").unwrap();

        let out = temp.path().join("out");
        assert_eq!(copy_static(&src, &out).unwrap(), 2);
        assert!(out.join("img/logo.svg").exists());
    }
}
