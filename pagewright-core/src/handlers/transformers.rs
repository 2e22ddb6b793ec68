use crate::handler::{Advance, BuildContext, Handler, HandlerError};
use crate::layout::{resolve_layouts, LAYOUT_HANDLER};
use crate::merge::merge;
use crate::page_map::normalize_url;
use crate::record::{keys, Content, PageRecord, RenderProps};
use crate::search::Search;
use crate::slug::{slugify, titleize, underscore};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use pagewright_types::{Attrs, Value};
use regex::Regex;
use std::future::Future;
use std::path::{Component, PathBuf};
use std::sync::{Arc, OnceLock};
use unicode_segmentation::UnicodeSegmentation;

/// Extensions dropped when deriving a page name from its file
const SOURCE_EXTENSIONS: &[&str] = &[
    "md", "markdown", "mdx", "html", "htm", "json", "yaml", "yml", "toml", "js", "jsx", "ts",
    "tsx",
];

static DATE_PREFIX: OnceLock<Regex> = OnceLock::new();

fn date_prefix() -> &'static Regex {
    DATE_PREFIX.get_or_init(|| {
        Regex::new(r"^(\d{4}).(\d{2}).(\d{2}).(.+)$").expect("date prefix pattern is valid")
    })
}

/// Split `2024-01-31-hello` into an ISO date and the remaining name
fn split_date_prefix(name: &str) -> Option<(String, String)> {
    let captures = date_prefix().captures(name)?;
    let year = captures[1].parse().ok()?;
    let month = captures[2].parse().ok()?;
    let day = captures[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some((date.format("%Y-%m-%d").to_string(), captures[4].to_string()))
}

fn parent_url(url: &str) -> String {
    match url.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => url[..i].to_string(),
    }
}

/// Derives `url`, `output_path`, `title`, `slug` and `date` from the path
pub struct PageDefaults {
    pages_dir: PathBuf,
}

impl PageDefaults {
    pub fn new(pages_dir: PathBuf) -> Self {
        Self { pages_dir }
    }

    fn derive(&self, record: &PageRecord) -> PageRecord {
        let relative = record
            .filename
            .strip_prefix(&self.pages_dir)
            .unwrap_or_else(|_| record.file_name());
        let dir_url: String = relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(format!("/{}", part.to_string_lossy())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut name = if record.has_extension(SOURCE_EXTENSIONS) {
            relative.file_stem()
        } else {
            relative.file_name()
        }
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

        let mut prefixed_date = None;
        if let Some((date, rest)) = split_date_prefix(&name) {
            prefixed_date = Some(date);
            name = rest;
        }

        let mut url = match record.url() {
            Some(url) => match url.strip_prefix("./") {
                Some(rest) => format!("{}/{}", dir_url, rest),
                None => url.to_string(),
            },
            None => format!("{}/{}", dir_url, name),
        };
        url = normalize_url(&url);

        let output_path = match record.output_path() {
            Some(path) => path.to_string(),
            None => {
                let last = url.rsplit('/').next().unwrap_or_default();
                if last.contains('.') {
                    url.clone()
                } else if last == "index" {
                    let path = format!("{}.html", url);
                    url = parent_url(&url);
                    path
                } else {
                    format!("{}/index.html", url.trim_end_matches('/'))
                }
            }
        };

        let title = record
            .title()
            .map(str::to_string)
            .unwrap_or_else(|| titleize(&underscore(&name)));
        let slug = record
            .slug()
            .map(str::to_string)
            .unwrap_or_else(|| slugify(&title));

        let mut next = record.clone();
        next.set(keys::URL, url);
        next.set(keys::OUTPUT_PATH, output_path);
        next.set(keys::TITLE, title);
        next.set(keys::SLUG, slug);
        if !next.attrs.contains_key(keys::DATE) {
            next.set(keys::DATE, prefixed_date);
        }
        next
    }
}

#[async_trait]
impl Handler for PageDefaults {
    fn name(&self) -> &str {
        "page-defaults"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        let complete = record.url().is_some()
            && record.output_path().is_some()
            && record.title().is_some()
            && record.slug().is_some()
            && record.attrs.contains_key(keys::DATE);
        !complete
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        Ok(Some(Advance::One(self.derive(record))))
    }
}

type HookFn = dyn Fn(Search, PageRecord) -> BoxFuture<'static, Result<Attrs, HandlerError>>
    + Send
    + Sync;

/// A per-page query whose result is merged into the page
#[derive(Clone)]
pub struct SearchHook(Arc<HookFn>);

impl SearchHook {
    pub fn new<F, Fut>(hook: F) -> Self
    where
        F: Fn(Search, PageRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Attrs, HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |search, record| hook(search, record).boxed()))
    }

    /// Wrap as an attribute value for the `search` key
    pub fn into_value(self) -> Value {
        Value::opaque("search", self)
    }

    pub fn from_value(value: &Value) -> Option<&SearchHook> {
        value.as_opaque()?.downcast_ref::<SearchHook>()
    }
}

/// Runs a page's search hook once and merges in what it returns
pub struct SearchTransform;

#[async_trait]
impl Handler for SearchTransform {
    fn name(&self) -> &str {
        "search"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record
            .get(keys::SEARCH)
            .and_then(SearchHook::from_value)
            .is_some()
    }

    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let Some(hook) = record
            .get(keys::SEARCH)
            .and_then(SearchHook::from_value)
            .cloned()
        else {
            return Ok(None);
        };
        let found = (hook.0)(cx.search(), record.clone()).await?;

        let mut next = record.clone();
        next.attrs = merge(&record.attrs, &found);
        next.set(keys::SEARCH, Value::Null);
        Ok(Some(Advance::One(next)))
    }
}

/// Resolves lazy content and drains streamed content into child pages
pub struct ContentFunction;

#[async_trait]
impl Handler for ContentFunction {
    fn name(&self) -> &str {
        "content-function"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        matches!(record.content, Some(Content::Lazy(_) | Content::Stream(_)))
    }

    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let props = RenderProps {
            record: record.clone(),
            children: None,
            search: cx.search(),
        };

        match &record.content {
            Some(Content::Lazy(producer)) => {
                let content = producer.call(props).await?;
                let mut next = record.clone();
                next.content = Some(content);
                Ok(Some(Advance::One(next)))
            }
            Some(Content::Stream(producer)) => {
                let mut fragments = producer.open(props);
                let mut children = Vec::new();
                while let Some(fragment) = fragments.next().await {
                    let fragment = fragment?;
                    let has_url = fragment
                        .attrs
                        .get(keys::URL)
                        .is_some_and(|url| url.as_str().is_some());
                    if !has_url || fragment.content.is_none() {
                        return Err(HandlerError::Invalid(format!(
                            "{} yielded a page without {}",
                            record.filename.display(),
                            if has_url { "content" } else { "a url" }
                        )));
                    }

                    let mut child = record.clone();
                    if !fragment.attrs.contains_key(keys::OUTPUT_PATH) {
                        child.set(keys::OUTPUT_PATH, Value::Null);
                    }
                    child.attrs.extend(fragment.attrs);
                    child.content = fragment.content;
                    children.push(child);
                }
                tracing::debug!(
                    "{} fanned out into {} pages",
                    record.filename.display(),
                    children.len()
                );
                Ok(Some(Advance::Many(children)))
            }
            _ => Ok(None),
        }
    }
}

/// Estimates reading time for documents
pub struct ReadingTime {
    words_per_minute: u32,
}

impl ReadingTime {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
        }
    }
}

#[async_trait]
impl Handler for ReadingTime {
    fn name(&self) -> &str {
        "reading-time"
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record.get(keys::READING_TIME).is_none()
            && record
                .output_path()
                .is_some_and(|path| path.ends_with(".html"))
            && matches!(record.content, Some(Content::Text(_) | Content::Node(_)))
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        let Some(text) = record.content.as_ref().and_then(Content::plain_text) else {
            return Ok(None);
        };
        let words = text.unicode_words().count();
        let minutes = (words as f64 / f64::from(self.words_per_minute)).ceil();
        Ok(Some(Advance::One(
            record.clone().with(keys::READING_TIME, minutes),
        )))
    }
}

/// Applies the layout chain named by `layout`
pub struct LayoutHandler;

#[async_trait]
impl Handler for LayoutHandler {
    fn name(&self) -> &str {
        LAYOUT_HANDLER
    }

    fn claims(&self, record: &PageRecord) -> bool {
        record.layout().is_some()
    }

    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        match resolve_layouts(cx, record).await {
            Ok(wrapped) => Ok(Some(Advance::One(wrapped))),
            Err(e) if !cx.is_production() => {
                tracing::warn!(
                    "Skipping layout for {}: {}",
                    record.filename.display(),
                    e
                );
                Ok(Some(Advance::One(
                    record.clone().with(keys::LAYOUT, Value::Null),
                )))
            }
            Err(e) => Err(e),
        }
    }
}
