use crate::handler::{Advance, BuildContext, Handler, HandlerError};
use crate::output::content_type_for_path;
use crate::record::{keys, Content, PageRecord};
use crate::slug::slugify;
use async_trait::async_trait;
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options
}

/// Slugs for each heading, in document order
fn heading_slugs(events: &[Event]) -> Vec<String> {
    let mut slugs = Vec::new();
    let mut current: Option<String> = None;
    for event in events {
        match event {
            Event::Start(Tag::Heading { .. }) => current = Some(String::new()),
            Event::Text(text) | Event::Code(text) => {
                if let Some(title) = current.as_mut() {
                    title.push_str(text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(title) = current.take() {
                    slugs.push(slugify(&title));
                }
            }
            _ => {}
        }
    }
    slugs
}

/// Give headings without an explicit `{#id}` an anchor derived from their text
fn attach_heading_ids<'a>(events: Vec<Event<'a>>) -> Vec<Event<'a>> {
    let mut slugs = heading_slugs(&events).into_iter();
    events
        .into_iter()
        .map(|event| match event {
            Event::Start(Tag::Heading {
                level,
                id,
                classes,
                attrs,
            }) => {
                let slug = slugs.next().filter(|s| !s.is_empty());
                let id = id.or_else(|| slug.map(CowStr::from));
                Event::Start(Tag::Heading {
                    level,
                    id,
                    classes,
                    attrs,
                })
            }
            other => other,
        })
        .collect()
}

/// Convert markdown text to HTML
pub fn render_markdown(markdown: &str) -> String {
    let events: Vec<Event> = Parser::new_ext(markdown, markdown_options()).collect();
    let events = attach_heading_ids(events);

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    out
}

/// Renders markdown sources to HTML text
pub struct MarkdownRenderer;

#[async_trait]
impl Handler for MarkdownRenderer {
    fn name(&self) -> &str {
        "markdown"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record.has_extension(MARKDOWN_EXTENSIONS)
            && record.mime_type().is_none()
            && matches!(record.content, Some(Content::Text(_)))
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let Some(markdown) = record.text() else {
            return Ok(None);
        };
        let mut next = record.clone().with(keys::MIME_TYPE, "text/html");
        next.content = Some(Content::Text(render_markdown(markdown)));
        Ok(Some(Advance::One(next)))
    }
}

/// Serialises tree content to HTML
pub struct HtmlRenderer;

#[async_trait]
impl Handler for HtmlRenderer {
    fn name(&self) -> &str {
        "html"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record.mime_type().is_none() && matches!(record.content, Some(Content::Node(_)))
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let Some(Content::Node(node)) = &record.content else {
            return Ok(None);
        };
        let mime = record
            .output_path()
            .map(content_type_for_path)
            .unwrap_or("text/html; charset=utf-8");
        let mut next = record.clone().with(keys::MIME_TYPE, mime);
        next.content = Some(Content::Text(node.render_html()));
        Ok(Some(Advance::One(next)))
    }
}

/// Marks plain text content as finished
pub struct StringRenderer;

#[async_trait]
impl Handler for StringRenderer {
    fn name(&self) -> &str {
        "string"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record.mime_type().is_none() && matches!(record.content, Some(Content::Text(_)))
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let mime = record
            .output_path()
            .map(content_type_for_path)
            .unwrap_or("text/plain; charset=utf-8");
        Ok(Some(Advance::One(record.clone().with(keys::MIME_TYPE, mime))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fs::LocalFs;
    use crate::handler::HandlerRegistry;
    use crate::record::Node;
    use pagewright_types::{attrs, Attrs};
    use std::sync::Arc;

    fn context() -> BuildContext {
        BuildContext::new(
            Config::rooted_at("/site"),
            Arc::new(LocalFs::new("/site")),
            HandlerRegistry::new(),
        )
    }

    async fn run(handler: &dyn Handler, record: &PageRecord) -> PageRecord {
        handler
            .advance(&context(), record)
            .await
            .unwrap()
            .unwrap()
            .into_records()
            .remove(0)
    }

    #[test]
    fn test_markdown_features() {
        let html = render_markdown("# Getting Started\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n~~old~~\n");
        assert!(html.contains(r#"<h1 id="getting-started">Getting Started</h1>"#));
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>old</del>"));
    }

    #[test]
    fn test_explicit_heading_id_is_kept() {
        let html = render_markdown("## Setup {#install}\n");
        assert!(html.contains(r#"<h2 id="install">Setup</h2>"#));
    }

    #[tokio::test]
    async fn test_markdown_renderer() {
        let record = PageRecord::new("post.md", Attrs::new()).with_content("*hi*".into());
        assert!(MarkdownRenderer.claims(&record));

        let out = run(&MarkdownRenderer, &record).await;
        assert_eq!(out.text(), Some("<p><em>hi</em></p>\n"));
        assert_eq!(out.mime_type(), Some("text/html"));
        assert!(!MarkdownRenderer.claims(&out));
        assert!(!StringRenderer.claims(&out));
    }

    #[tokio::test]
    async fn test_html_renderer() {
        let node = Node::element("p", vec![Node::text("a < b")]);
        let record = PageRecord::new("a.html", attrs! { "output_path" => "/a/index.html" })
            .with_content(node.into());

        let out = run(&HtmlRenderer, &record).await;
        assert_eq!(out.text(), Some("<p>a &lt; b</p>"));
        assert_eq!(out.mime_type(), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_string_renderer_mime_from_output() {
        let record = PageRecord::new("feed.txt", attrs! { "output_path" => "/feed.xml" })
            .with_content("<rss/>".into());
        let out = run(&StringRenderer, &record).await;
        assert_eq!(out.mime_type(), Some("application/xml"));

        let bare = PageRecord::new("notes", Attrs::new()).with_content("x".into());
        let out = run(&StringRenderer, &bare).await;
        assert_eq!(out.mime_type(), Some("text/plain; charset=utf-8"));
    }
}
