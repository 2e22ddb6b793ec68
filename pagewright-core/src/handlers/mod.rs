//! Built-in handlers.
//!
//! Loaders turn a source file into attributes and content, transformers
//! derive or rewrite attributes, and renderers turn content into its final
//! form. Registration order decides which handler wins a pass.

mod loaders;
mod renderers;
mod sitemap;
mod transformers;

pub use loaders::{DataLoader, FrontmatterLoader, ReadFile};
pub use renderers::{HtmlRenderer, MarkdownRenderer, StringRenderer};
pub use sitemap::Sitemap;
pub use transformers::{ContentFunction, LayoutHandler, PageDefaults, ReadingTime, SearchHook, SearchTransform};

use crate::config::Config;
use crate::handler::{Handler, HandlerRegistry, ResolveError};
use std::sync::Arc;

/// Handler chain used when the configuration does not name one
pub const DEFAULT_HANDLERS: &[&str] = &[
    "data",
    "frontmatter",
    "read-file",
    "page-defaults",
    "search",
    "content-function",
    "reading-time",
    "markdown",
    "layout",
    "html",
    "string",
];

/// Construct a built-in handler by name
pub fn builtin(name: &str, config: &Config) -> Option<Arc<dyn Handler>> {
    let handler: Arc<dyn Handler> = match name {
        "data" => Arc::new(DataLoader),
        "frontmatter" => Arc::new(FrontmatterLoader),
        "read-file" => Arc::new(ReadFile),
        "page-defaults" => Arc::new(PageDefaults::new(config.pages_dir())),
        "search" => Arc::new(SearchTransform),
        "content-function" => Arc::new(ContentFunction),
        "reading-time" => Arc::new(ReadingTime::new(config.reading_time.words_per_minute)),
        "markdown" => Arc::new(MarkdownRenderer),
        "layout" => Arc::new(LayoutHandler),
        "html" => Arc::new(HtmlRenderer),
        "string" => Arc::new(StringRenderer),
        "sitemap" => Arc::new(Sitemap::new(&config.site.url)),
        _ => return None,
    };
    Some(handler)
}

/// Registry for the handlers named in `config`.
///
/// The sitemap handler joins automatically when a site URL is configured.
pub fn registry_from_config(config: &Config) -> Result<HandlerRegistry, ResolveError> {
    let mut registry = HandlerRegistry::new();
    for name in &config.handlers {
        let handler =
            builtin(name, config).ok_or_else(|| ResolveError::NotRegistered(name.clone()))?;
        registry.register(handler);
    }
    if !config.site.url.is_empty() && registry.get("sitemap").is_none() {
        if let Some(sitemap) = builtin("sitemap", config) {
            registry.register(sitemap);
        }
    }
    Ok(registry)
}
