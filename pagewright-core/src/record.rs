//! Page records and their content payloads.

use crate::handler::HandlerError;
use crate::search::Search;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream};
use pagewright_types::{Attrs, RecordId, Value};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reserved attribute keys
pub mod keys {
    pub const URL: &str = "url";
    pub const OUTPUT_PATH: &str = "output_path";
    pub const LAYOUT: &str = "layout";
    pub const TITLE: &str = "title";
    pub const SLUG: &str = "slug";
    pub const DATE: &str = "date";
    pub const MIME_TYPE: &str = "mime_type";
    pub const HANDLERS: &str = "handlers";
    pub const SEARCH: &str = "search";
    pub const READING_TIME: &str = "reading_time_mins";
}

/// A unit of content at some stage of the pipeline
#[derive(Clone)]
pub struct PageRecord {
    pub id: RecordId,
    /// Source path; never rewritten once the record is seeded
    pub filename: PathBuf,
    pub attrs: Attrs,
    pub content: Option<Content>,
    /// Set by loaders once `filename` has been read into this record
    pub loaded_from: Option<PathBuf>,
}

impl PageRecord {
    pub fn new(filename: impl Into<PathBuf>, attrs: Attrs) -> Self {
        Self {
            id: RecordId::next(),
            filename: filename.into(),
            attrs,
            content: None,
            loaded_from: None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.attrs.insert(key.to_string(), value.into());
    }

    /// Attribute lookup that treats an explicit `Null` as missing
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Attribute value as seen by queries, including the virtual `filename`
    pub fn field(&self, key: &str) -> Value {
        if key == "filename" {
            return Value::from(self.filename.to_string_lossy().into_owned());
        }
        self.attrs.get(key).cloned().unwrap_or_default()
    }

    pub fn url(&self) -> Option<&str> {
        self.get_str(keys::URL)
    }

    pub fn output_path(&self) -> Option<&str> {
        self.get_str(keys::OUTPUT_PATH)
    }

    pub fn layout(&self) -> Option<&str> {
        self.get_str(keys::LAYOUT)
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str(keys::TITLE)
    }

    pub fn slug(&self) -> Option<&str> {
        self.get_str(keys::SLUG)
    }

    pub fn date(&self) -> Option<&str> {
        self.get_str(keys::DATE)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.get_str(keys::MIME_TYPE)
    }

    /// Explicit handler chain, as a single name or a list of names
    pub fn handler_override(&self) -> Option<Vec<String>> {
        match self.get(keys::HANDLERS)? {
            Value::String(name) => Some(vec![name.clone()]),
            Value::Array(names) => Some(
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Lowercased file extension of the source file
    pub fn extension(&self) -> Option<String> {
        self.filename
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    pub fn has_extension(&self, candidates: &[&str]) -> bool {
        self.extension()
            .is_some_and(|ext| candidates.contains(&ext.as_str()))
    }

    /// Whether a loader has already read `filename` into this record
    pub fn is_loaded(&self) -> bool {
        self.loaded_from.as_deref() == Some(self.filename.as_path())
    }

    pub fn mark_loaded(&mut self) {
        self.loaded_from = Some(self.filename.clone());
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn file_name(&self) -> &Path {
        self.filename
            .file_name()
            .map(Path::new)
            .unwrap_or(self.filename.as_path())
    }
}

impl fmt::Debug for PageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRecord")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("attrs", &self.attrs)
            .field("content", &self.content)
            .finish()
    }
}

/// Content payload carried by a record
#[derive(Clone)]
pub enum Content {
    Text(String),
    Node(Node),
    /// Produces content on demand, given the record and optional children
    Lazy(LazyContent),
    /// Produces a finite sequence of child fragments (fan-out)
    Stream(StreamContent),
}

impl Content {
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Node(_) => "node",
            Content::Lazy(_) => "lazy",
            Content::Stream(_) => "stream",
        }
    }

    /// Plain text view of content that is already materialised
    pub fn plain_text(&self) -> Option<String> {
        match self {
            Content::Text(text) => Some(text.clone()),
            Content::Node(node) => Some(node.text_content()),
            _ => None,
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Content::Node(node) => f.debug_tuple("Node").field(node).finish(),
            Content::Lazy(_) => f.write_str("Lazy(..)"),
            Content::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<Node> for Content {
    fn from(node: Node) -> Self {
        Content::Node(node)
    }
}

/// Arguments passed to lazy content and stream producers
#[derive(Clone)]
pub struct RenderProps {
    pub record: PageRecord,
    pub children: Option<Content>,
    pub search: Search,
}

type LazyFn =
    dyn Fn(RenderProps) -> BoxFuture<'static, Result<Content, HandlerError>> + Send + Sync;

#[derive(Clone)]
pub struct LazyContent(Arc<LazyFn>);

impl LazyContent {
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn(RenderProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Content, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |props| producer(props).boxed()))
    }

    pub async fn call(&self, props: RenderProps) -> Result<Content, HandlerError> {
        (self.0)(props).await
    }
}

/// One element yielded by a stream producer
#[derive(Debug, Clone)]
pub struct Fragment {
    pub attrs: Attrs,
    pub content: Option<Content>,
}

impl Fragment {
    pub fn new(attrs: Attrs, content: impl Into<Content>) -> Self {
        Self {
            attrs,
            content: Some(content.into()),
        }
    }
}

type StreamFn =
    dyn Fn(RenderProps) -> BoxStream<'static, Result<Fragment, HandlerError>> + Send + Sync;

/// Fan-out producer; every call starts a fresh sequence
#[derive(Clone)]
pub struct StreamContent(Arc<StreamFn>);

impl StreamContent {
    pub fn new<F, S>(producer: F) -> Self
    where
        F: Fn(RenderProps) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Fragment, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |props| Box::pin(producer(props))))
    }

    /// Convenience for a fixed list of fragments
    pub fn from_fragments(fragments: Vec<Fragment>) -> Self {
        Self::new(move |_| futures::stream::iter(fragments.clone().into_iter().map(Ok)))
    }

    pub fn open(&self, props: RenderProps) -> BoxStream<'static, Result<Fragment, HandlerError>> {
        (self.0)(props)
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Minimal render tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    /// Pre-rendered markup, emitted verbatim
    Raw(String),
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Node>,
    },
    Fragment(Vec<Node>),
    /// Slot a layout fills with the wrapped page
    Children,
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub fn element(tag: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Node::Element { attrs, .. } = &mut self {
            attrs.push((name.into(), value.into()));
        }
        self
    }

    /// Replace every `Children` slot with `children`
    pub fn fill_children(&self, children: &Node) -> Node {
        match self {
            Node::Children => children.clone(),
            Node::Element {
                tag,
                attrs,
                children: inner,
            } => Node::Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children: inner.iter().map(|n| n.fill_children(children)).collect(),
            },
            Node::Fragment(nodes) => {
                Node::Fragment(nodes.iter().map(|n| n.fill_children(children)).collect())
            }
            other => other.clone(),
        }
    }

    pub fn render_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(&escape_html(text)),
            Node::Raw(html) => out.push_str(html),
            Node::Element {
                tag,
                attrs,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for child in children {
                    child.write_html(out);
                }
                out.push_str(&format!("</{}>", tag));
            }
            Node::Fragment(nodes) => {
                for node in nodes {
                    node.write_html(out);
                }
            }
            Node::Children => {}
        }
    }

    /// Concatenated text of the tree, for word counts
    pub fn text_content(&self) -> String {
        match self {
            Node::Text(text) | Node::Raw(text) => text.clone(),
            Node::Element { children, .. } | Node::Fragment(children) => children
                .iter()
                .map(Node::text_content)
                .collect::<Vec<_>>()
                .join(" "),
            Node::Children => String::new(),
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
