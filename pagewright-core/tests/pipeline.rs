//! End-to-end builds over a temporary site directory.

use async_trait::async_trait;
use pagewright_core::handler::{Advance, HandlerError};
use pagewright_core::handlers::{ContentFunction, StringRenderer};
use pagewright_core::fs::LocalFs;
use pagewright_core::output::write_pages;
use pagewright_core::pages::IssueKind;
use pagewright_core::record::{Fragment, StreamContent};
use pagewright_core::{
    attrs, BuildContext, BuildMode, Config, Content, Handler, HandlerRegistry, PageRecord, Pages,
    Query, SortDirection, Value,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, file: &str, text: &str) {
    let path = root.join(file);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn blog_site() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "layouts/base.html", "<html><body>{{ children }}</body></html>");
    write(
        root,
        "layouts/post.html",
        "---\nlayout: base\n---\n<article>{{ children }}</article>",
    );
    write(root, "pages/_data.yml", "tags: [site]\n");
    write(root, "pages/blog/_data.yml", "tags: [blog]\nkind: post\n");
    write(
        root,
        "pages/blog/2024-05-01-hello.md",
        "---\nlayout: post\n---\n# Hello\n\nSome words here.\n",
    );
    write(
        root,
        "pages/blog/2024-06-01-second.md",
        "---\nlayout: post\n---\nSecond post.\n",
    );
    write(root, "pages/about.md", "---\ntitle: About us\n---\nAbout.\n");
    temp
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap_or_default()
        .iter()
        .map(|v| v.to_string())
        .collect()
}

#[tokio::test]
async fn test_default_pipeline_builds_site() {
    let temp = blog_site();
    let pages = Pages::from_config(Config::rooted_at(temp.path())).unwrap();
    let report = pages.init().await.unwrap();

    assert!(report.issues.is_empty(), "{:?}", report.issues);
    assert!(!report.timed_out);
    assert_eq!(
        pages.pages().urls(),
        vec!["/about", "/blog/hello", "/blog/second"]
    );

    let hello = pages.pages().get("/blog/hello").unwrap();
    assert_eq!(hello.title(), Some("Hello"));
    assert_eq!(hello.date(), Some("2024-05-01"));
    assert_eq!(hello.output_path(), Some("/blog/hello/index.html"));
    assert_eq!(hello.attrs["reading_time_mins"], Value::from(1));
    assert!(hello.layout().is_none());

    let html = pages.render("/blog/hello").await.unwrap().unwrap();
    assert!(html.starts_with(
        "<!DOCTYPE html><html><body><article><h1 id=\"hello\">Hello</h1>"
    ));
    assert!(html.ends_with("</article></body></html>"));
}

#[tokio::test]
async fn test_shared_data_is_inherited_top_down() {
    let temp = blog_site();
    let pages = Pages::from_config(Config::rooted_at(temp.path())).unwrap();
    pages.init().await.unwrap();

    let hello = pages.pages().get("/blog/hello").unwrap();
    assert_eq!(strings(&hello.attrs["tags"]), vec!["site", "blog"]);
    assert_eq!(hello.get_str("kind"), Some("post"));

    let about = pages.pages().get("/about").unwrap();
    assert_eq!(strings(&about.attrs["tags"]), vec!["site"]);
    assert!(about.get("kind").is_none());
    assert_eq!(about.title(), Some("About us"));
}

#[tokio::test]
async fn test_broken_data_file_keeps_parent_context() {
    let temp = blog_site();
    write(temp.path(), "pages/blog/_data.json", "{ not json");
    let pages = Pages::from_config(Config::rooted_at(temp.path())).unwrap();
    let report = pages.init().await.unwrap();

    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, IssueKind::DataFile);
    let hello = pages.pages().get("/blog/hello").unwrap();
    assert_eq!(strings(&hello.attrs["tags"]), vec!["site", "blog"]);
}

#[tokio::test]
async fn test_neighbour_queries() {
    let temp = blog_site();
    let pages = Pages::from_config(Config::rooted_at(temp.path())).unwrap();
    pages.init().await.unwrap();

    let search = pages.search();
    let posts = Query::new()
        .filter("kind", "post")
        .sort_by("date", SortDirection::Asc);

    let found = search.pages(&posts).await;
    assert_eq!(found.len(), 2);
    let next = search.next_page("/blog/hello", &posts).await.unwrap();
    assert_eq!(next.url(), Some("/blog/second"));
    assert!(search.previous_page("/blog/hello", &posts).await.is_none());
    assert!(search.next_page("/blog/second", &posts).await.is_none());
}

#[tokio::test]
async fn test_missing_layout_depends_on_mode() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "pages/a.md", "---\nlayout: nowhere\n---\nHi\n");

    let pages = Pages::from_config(Config::rooted_at(temp.path())).unwrap();
    let report = pages.init().await.unwrap();
    assert!(report.issues.is_empty());
    assert_eq!(pages.render("/a").await.unwrap().unwrap(), "<!DOCTYPE html><p>Hi</p>\n");

    let mut config = Config::rooted_at(temp.path());
    config.mode = BuildMode::Production;
    let pages = Pages::from_config(config).unwrap();
    let report = pages.init().await.unwrap();
    assert_eq!(report.issues[0].kind, IssueKind::HandlerFailed);
    assert!(report.is_failed());
    assert!(pages.pages().is_empty());
}

#[tokio::test]
async fn test_write_pages_and_sitemap() {
    let temp = blog_site();
    let mut config = Config::rooted_at(temp.path());
    config.site.url = "https://example.com".to_string();
    let out = config.output_dir();
    let pages = Pages::from_config(config).unwrap();
    pages.init().await.unwrap();

    let written = write_pages(pages.context(), &out).await.unwrap();
    assert_eq!(written, 4);

    let about = std::fs::read_to_string(out.join("about/index.html")).unwrap();
    assert_eq!(about, "<!DOCTYPE html><p>About.</p>\n");

    let sitemap = std::fs::read_to_string(out.join("sitemap.xml")).unwrap();
    insta::assert_snapshot!(sitemap.trim_end(), @r#"
<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/about</loc>
  </url>
  <url>
    <loc>https://example.com/blog/hello</loc>
    <lastmod>2024-05-01</lastmod>
  </url>
  <url>
    <loc>https://example.com/blog/second</loc>
    <lastmod>2024-06-01</lastmod>
  </url>
</urlset>
"#);
}

/// Turns `/list` into a two-page stream
struct Splitter;

#[async_trait]
impl Handler for Splitter {
    fn name(&self) -> &str {
        "splitter"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record.url().is_none()
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let stream = StreamContent::from_fragments(vec![
            Fragment::new(attrs! { "url" => "/list/1" }, "one"),
            Fragment::new(attrs! { "url" => "/list/2" }, "two"),
        ]);
        let next = record
            .clone()
            .with("url", "/list")
            .with_content(Content::Stream(stream));
        Ok(Some(Advance::One(next)))
    }
}

#[tokio::test]
async fn test_fan_out_replaces_parent() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "pages/list.txt", "");

    let registry = HandlerRegistry::new()
        .with(Splitter)
        .with(ContentFunction)
        .with(StringRenderer);
    let cx = BuildContext::new(
        Config::rooted_at(temp.path()),
        Arc::new(LocalFs::new(temp.path())),
        registry,
    );
    let pages = Pages::new(cx);
    let report = pages.init().await.unwrap();

    assert!(report.issues.is_empty(), "{:?}", report.issues);
    assert_eq!(pages.pages().urls(), vec!["/list/1", "/list/2"]);

    let child = pages.pages().get("/list/2").unwrap();
    assert_eq!(child.text(), Some("two"));
    assert_eq!(child.mime_type(), Some("text/plain; charset=utf-8"));

    let handlers: Vec<_> = pages
        .lineage(child.id)
        .into_iter()
        .map(|entry| entry.handler)
        .collect();
    assert_eq!(
        handlers,
        vec![
            Some("string".to_string()),
            Some("content-function".to_string()),
            Some("splitter".to_string()),
            None,
        ]
    );
}
