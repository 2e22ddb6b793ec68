//! Layout resolution: wrapping page content in named layout files.
//!
//! A page whose `layout` attribute names a file in the layouts directory is
//! wrapped in that file's content. The layout's data sits underneath the
//! page's data, and the layout's own `layout` becomes the next link in the
//! chain. Resolution stops once `layout` is no longer a string.

use crate::handler::{Advance, BuildContext, HandlerError};
use crate::record::{keys, Content, LazyContent, Node, PageRecord, RenderProps};
use pagewright_types::Value;
use regex::{NoExpand, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Nesting limit; a longer chain is treated as a cycle
pub const MAX_LAYOUT_DEPTH: usize = 32;

/// Extensions tried when a layout is named without one
const LAYOUT_EXTENSIONS: &[&str] = &["html", "htm", "md"];

/// Name of the handler that drives this resolver
pub const LAYOUT_HANDLER: &str = "layout";

/// Attributes the chain derives for a layout's own location. They are only
/// passed on to the page when the layout file declares them itself.
const LAYOUT_LOCAL_KEYS: &[&str] = &[
    keys::URL,
    keys::OUTPUT_PATH,
    keys::MIME_TYPE,
    keys::TITLE,
    keys::SLUG,
    keys::DATE,
    keys::READING_TIME,
];

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("layout `{name}` not found in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("layout `{0}` has no content")]
    Empty(String),

    #[error("layout chain deeper than {MAX_LAYOUT_DEPTH} levels starting at `{0}`")]
    TooDeep(String),

    #[error("cannot wrap {0} content in a layout")]
    Unwrappable(&'static str),

    #[error("layout {} still changing after {} passes", .0.display(), .1)]
    Unsettled(PathBuf, usize),

    #[error("layout {} produced several records", .0.display())]
    FannedOut(PathBuf),
}

static CHILDREN_MARKER: OnceLock<Regex> = OnceLock::new();

fn children_marker() -> &'static Regex {
    CHILDREN_MARKER.get_or_init(|| {
        Regex::new(r"\{\{\s*children\s*\}\}").expect("children marker pattern is valid")
    })
}

/// Find the file backing a layout name
pub async fn find_layout(cx: &BuildContext, name: &str) -> Result<PathBuf, LayoutError> {
    let dir = cx.config.layouts_dir();
    let direct = dir.join(name);
    let mut candidates = vec![direct.clone()];
    if direct.extension().is_none() {
        candidates.extend(
            LAYOUT_EXTENSIONS
                .iter()
                .map(|ext| direct.with_extension(ext)),
        );
    }

    for candidate in candidates {
        if cx.fs.exists(&candidate).await {
            return Ok(candidate);
        }
    }
    Err(LayoutError::NotFound {
        name: name.to_string(),
        dir,
    })
}

/// Load a layout file and run it through the handler chain until it is
/// terminal. The layout handler itself is left out; nesting is driven by
/// [`resolve_layouts`].
pub async fn load_layout(cx: &BuildContext, path: &Path) -> Result<PageRecord, HandlerError> {
    let mut record = cx.load(path).await?;
    let declared: Vec<String> = record.attrs.keys().cloned().collect();

    let limit = cx.config.build.max_passes;
    for _ in 0..limit {
        let Some(pass) = cx.process_skipping(&record, &[LAYOUT_HANDLER]).await? else {
            record.attrs.retain(|key, _| {
                !LAYOUT_LOCAL_KEYS.contains(&key.as_str()) || declared.contains(key)
            });
            return Ok(record);
        };
        record = match pass.output {
            Advance::One(next) => next,
            Advance::Many(_) => return Err(LayoutError::FannedOut(path.to_path_buf()).into()),
        };
    }
    Err(LayoutError::Unsettled(path.to_path_buf(), limit).into())
}

/// Apply every layout in the chain named by `record`
pub async fn resolve_layouts(
    cx: &BuildContext,
    record: &PageRecord,
) -> Result<PageRecord, HandlerError> {
    let mut current = record.clone();
    let first = record.layout().unwrap_or_default().to_string();
    let mut depth = 0;

    while let Some(name) = current.layout().map(str::to_string) {
        depth += 1;
        if depth > MAX_LAYOUT_DEPTH {
            return Err(LayoutError::TooDeep(first).into());
        }

        let path = find_layout(cx, &name).await?;
        let layout = load_layout(cx, &path).await?;
        let frame = layout
            .content
            .clone()
            .ok_or_else(|| LayoutError::Empty(name.clone()))?;
        let children = current
            .content
            .take()
            .unwrap_or_else(|| Content::Text(String::new()));

        tracing::debug!("Wrapping {} in layout {}", current.filename.display(), name);

        let mut attrs = layout.attrs.clone();
        attrs.extend(std::mem::take(&mut current.attrs));
        attrs.insert(
            keys::LAYOUT.to_string(),
            layout.attrs.get(keys::LAYOUT).cloned().unwrap_or(Value::Null),
        );
        current.attrs = attrs;
        current.content = Some(wrap(&frame, children)?);
    }

    Ok(current)
}

/// Wrap `children` in a layout's content.
///
/// Content that cannot be combined yet (lazy on either side) is deferred into
/// a lazy producer that finishes the job when the page is rendered.
pub fn wrap(frame: &Content, children: Content) -> Result<Content, HandlerError> {
    match (frame, children) {
        (Content::Stream(_), _) => Err(LayoutError::Unwrappable("streamed layout").into()),
        (_, Content::Stream(_)) => Err(LayoutError::Unwrappable("streamed page").into()),
        (Content::Lazy(layout), children) => {
            let layout = layout.clone();
            Ok(Content::Lazy(LazyContent::new(move |props: RenderProps| {
                let layout = layout.clone();
                let children = children.clone();
                async move {
                    let children = materialize(children, props.clone()).await?;
                    layout
                        .call(RenderProps {
                            children: Some(children),
                            ..props
                        })
                        .await
                }
            })))
        }
        (frame, Content::Lazy(children)) => {
            let frame = frame.clone();
            Ok(Content::Lazy(LazyContent::new(move |props: RenderProps| {
                let frame = frame.clone();
                let children = Content::Lazy(children.clone());
                async move { wrap(&frame, materialize(children, props).await?) }
            })))
        }
        (Content::Node(node), Content::Node(child)) => {
            Ok(Content::Node(node.fill_children(&child)))
        }
        (Content::Node(node), Content::Text(html)) => {
            Ok(Content::Node(node.fill_children(&Node::Raw(html))))
        }
        (Content::Text(text), Content::Text(html)) => Ok(Content::Text(
            children_marker()
                .replace_all(text, NoExpand(&html))
                .into_owned(),
        )),
        (Content::Text(text), Content::Node(child)) => Ok(Content::Text(
            children_marker()
                .replace_all(text, NoExpand(&child.render_html()))
                .into_owned(),
        )),
    }
}

/// Call lazy content until it yields something concrete
pub async fn materialize(mut content: Content, props: RenderProps) -> Result<Content, HandlerError> {
    for _ in 0..MAX_LAYOUT_DEPTH {
        match content {
            Content::Lazy(producer) => content = producer.call(props.clone()).await?,
            other => return Ok(other),
        }
    }
    Err(LayoutError::Unwrappable("endlessly lazy").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerRegistry;
    use crate::handlers;
    use crate::config::Config;
    use crate::fs::LocalFs;
    use pagewright_types::{attrs, Attrs};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(root: &std::path::Path) -> BuildContext {
        let config = Config::rooted_at(root);
        let registry: HandlerRegistry = handlers::registry_from_config(&config).unwrap();
        BuildContext::new(config, Arc::new(LocalFs::new(root)), registry)
    }

    fn props(record: PageRecord) -> RenderProps {
        RenderProps {
            record,
            children: None,
            search: crate::search::Search::new(crate::page_map::PageMap::new()),
        }
    }

    #[test]
    fn test_wrap_text_marker() {
        let frame = Content::from("<main>{{ children }}</main>");
        let wrapped = wrap(&frame, Content::from("<p>hi</p>")).unwrap();
        assert_eq!(wrapped.plain_text().unwrap(), "<main><p>hi</p></main>");
    }

    #[test]
    fn test_wrap_node_slot_with_text() {
        let frame = Content::Node(Node::element("body", vec![Node::Children]));
        let wrapped = wrap(&frame, Content::from("<em>x</em>")).unwrap();
        match wrapped {
            Content::Node(node) => assert_eq!(node.render_html(), "<body><em>x</em></body>"),
            other => panic!("expected node, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lazy_layout_receives_children() {
        let frame = Content::Lazy(LazyContent::new(|props: RenderProps| async move {
            let inner = props
                .children
                .and_then(|c| c.plain_text())
                .unwrap_or_default();
            Ok(Content::Text(format!("[{}]", inner)))
        }));
        let wrapped = wrap(&frame, Content::from("body")).unwrap();
        let record = PageRecord::new("a.md", Attrs::new());
        let rendered = materialize(wrapped, props(record)).await.unwrap();
        assert_eq!(rendered.plain_text().unwrap(), "[body]");
    }

    #[tokio::test]
    async fn test_resolve_nested_layouts() {
        let temp = TempDir::new().unwrap();
        let layouts = temp.path().join("layouts");
        std::fs::create_dir_all(&layouts).unwrap();
        std::fs::write(
            layouts.join("post.html"),
            "---\nlayout: base\nsection: posts\ntitle: Layout title\n---\n<article>{{ children }}</article>",
        )
        .unwrap();
        std::fs::write(
            layouts.join("base.html"),
            "---\nsection: root\nlang: en\n---\n<body>{{children}}</body>",
        )
        .unwrap();

        let cx = context(temp.path());
        let page = PageRecord::new("pages/a.md", attrs! { "layout" => "post", "title" => "Page" })
            .with_content(Content::from("<p>a</p>"));

        let resolved = resolve_layouts(&cx, &page).await.unwrap();
        assert_eq!(
            resolved.text(),
            Some("<body><article><p>a</p></article></body>")
        );
        assert_eq!(resolved.title(), Some("Page"));
        assert_eq!(resolved.get_str("section"), Some("posts"));
        assert_eq!(resolved.get_str("lang"), Some("en"));
        assert!(resolved.layout().is_none());
    }

    #[tokio::test]
    async fn test_markdown_layout_is_rendered() {
        let temp = TempDir::new().unwrap();
        let layouts = temp.path().join("layouts");
        std::fs::create_dir_all(&layouts).unwrap();
        std::fs::write(layouts.join("base.md"), "# Site Header\n\n{{ children }}\n").unwrap();

        let cx = context(temp.path());
        let page = PageRecord::new("pages/a.md", attrs! { "layout" => "base" })
            .with_content(Content::from("<p>Hi</p>"));

        let resolved = resolve_layouts(&cx, &page).await.unwrap();
        let html = resolved.text().unwrap();
        assert!(html.contains("<h1 id=\"site-header\">Site Header</h1>"), "{}", html);
        assert!(html.contains("<p>Hi</p>"));
        assert!(!html.contains("# Site Header"));
        // The layout's own location never leaks into the page
        assert!(resolved.url().is_none());
        assert!(resolved.mime_type().is_none());
    }

    #[tokio::test]
    async fn test_missing_layout() {
        let temp = TempDir::new().unwrap();
        let cx = context(temp.path());
        let page = PageRecord::new("pages/a.md", attrs! { "layout" => "nope" })
            .with_content(Content::from("x"));
        let err = resolve_layouts(&cx, &page).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Layout(LayoutError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_layout_cycle_is_bounded() {
        let temp = TempDir::new().unwrap();
        let layouts = temp.path().join("layouts");
        std::fs::create_dir_all(&layouts).unwrap();
        std::fs::write(layouts.join("loop.html"), "---\nlayout: loop\n---\n{{ children }}").unwrap();

        let cx = context(temp.path());
        let page = PageRecord::new("pages/a.md", attrs! { "layout" => "loop" })
            .with_content(Content::from("x"));
        assert!(matches!(
            resolve_layouts(&cx, &page).await,
            Err(HandlerError::Layout(LayoutError::TooDeep(_)))
        ));
    }
}
