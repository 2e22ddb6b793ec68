//! Handler plugins and the chain resolver.
//!
//! A handler is a loader, transformer or renderer. On every pass the
//! orchestrator asks the [`HandlerRegistry`] which handlers claim a record
//! and offers the record to each in registration order; the first one that
//! returns an [`Advance`] wins the pass. A record nobody advances is terminal.

use crate::config::Config;
use crate::fs::Filesystem;
use crate::layout::LayoutError;
use crate::page_map::PageMap;
use crate::record::PageRecord;
use crate::search::Search;
use async_trait::async_trait;
use pagewright_types::Attrs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("handler `{0}` is not registered")]
    NotRegistered(String),

    #[error("no handler claims {}", .0.display())]
    NoHandler(PathBuf),
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to read {}", .0.display())]
    Unreadable(PathBuf),

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Result of a handler advancing a record
#[derive(Debug)]
pub enum Advance {
    One(PageRecord),
    /// Fan-out: each record continues independently
    Many(Vec<PageRecord>),
}

impl Advance {
    pub fn into_records(self) -> Vec<PageRecord> {
        match self {
            Advance::One(record) => vec![record],
            Advance::Many(records) => records,
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler can advance `record`
    fn claims(&self, record: &PageRecord) -> bool;

    /// Advance `record` by one step; `None` passes the record on
    async fn advance(
        &self,
        cx: &BuildContext,
        record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError>;

    /// Records only known once every input has been seen
    async fn after_initial_pass(&self, _cx: &BuildContext) -> Result<Vec<PageRecord>, HandlerError> {
        Ok(Vec::new())
    }
}

/// Handler instances, constructed once and shared by every record
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Ordered handlers to offer `record` to on its next pass
    pub fn resolve(&self, record: &PageRecord) -> Result<Vec<Arc<dyn Handler>>, ResolveError> {
        let candidates = match record.handler_override() {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.get(name)
                        .cloned()
                        .ok_or_else(|| ResolveError::NotRegistered(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => self.handlers.clone(),
        };

        let claiming: Vec<_> = candidates
            .into_iter()
            .filter(|h| h.claims(record))
            .collect();

        if claiming.is_empty() {
            Err(ResolveError::NoHandler(record.filename.clone()))
        } else {
            Ok(claiming)
        }
    }

    /// First registered handler claiming `record`
    pub fn loader_for(&self, record: &PageRecord) -> Result<Arc<dyn Handler>, ResolveError> {
        self.handlers
            .iter()
            .find(|h| h.claims(record))
            .cloned()
            .ok_or_else(|| ResolveError::NoHandler(record.filename.clone()))
    }
}

/// A single successful pass
#[derive(Debug)]
pub struct Pass {
    pub handler: String,
    pub elapsed: Duration,
    pub output: Advance,
}

/// Everything a handler may consult while advancing a record
#[derive(Clone)]
pub struct BuildContext {
    pub config: Arc<Config>,
    pub fs: Arc<dyn Filesystem>,
    pub registry: Arc<HandlerRegistry>,
    pub pages: PageMap,
}

impl BuildContext {
    pub fn new(config: Config, fs: Arc<dyn Filesystem>, registry: HandlerRegistry) -> Self {
        Self {
            config: Arc::new(config),
            fs,
            registry: Arc::new(registry),
            pages: PageMap::new(),
        }
    }

    pub fn search(&self) -> Search {
        Search::new(self.pages.clone())
    }

    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// Offer `record` to its chain once; `None` means it is terminal
    pub async fn process_once(&self, record: &PageRecord) -> Result<Option<Pass>, HandlerError> {
        self.process_skipping(record, &[]).await
    }

    /// Like [`process_once`](Self::process_once), never offering the record
    /// to the handlers named in `skip`
    pub async fn process_skipping(
        &self,
        record: &PageRecord,
        skip: &[&str],
    ) -> Result<Option<Pass>, HandlerError> {
        let handlers = match self.registry.resolve(record) {
            Ok(handlers) => handlers,
            Err(ResolveError::NoHandler(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for handler in handlers.into_iter().filter(|h| !skip.contains(&h.name())) {
            let started = Instant::now();
            if let Some(output) = handler.advance(self, record).await? {
                let elapsed = started.elapsed();
                tracing::debug!(
                    "{} advanced {} in {:?}",
                    handler.name(),
                    record.filename.display(),
                    elapsed
                );
                return Ok(Some(Pass {
                    handler: handler.name().to_string(),
                    elapsed,
                    output,
                }));
            }
        }

        Ok(None)
    }

    /// Load a file outside the page tree with its single best loader
    pub async fn load(&self, path: &Path) -> Result<PageRecord, HandlerError> {
        let seed = PageRecord::new(self.fs.resolve(path), Attrs::new());
        let loader = self.registry.loader_for(&seed)?;
        match loader.advance(self, &seed).await? {
            Some(Advance::One(record)) => Ok(record),
            Some(Advance::Many(_)) => Err(HandlerError::Invalid(format!(
                "{} produced several records for {}",
                loader.name(),
                path.display()
            ))),
            None => Ok(seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewright_types::{attrs, Value};

    struct ByExtension {
        name: &'static str,
        ext: &'static str,
    }

    #[async_trait]
    impl Handler for ByExtension {
        fn name(&self) -> &str {
            self.name
        }

        fn claims(&self, record: &PageRecord) -> bool {
            record.has_extension(&[self.ext])
        }

        async fn advance(
            &self,
            _cx: &BuildContext,
            record: &PageRecord,
        ) -> Result<Option<Advance>, HandlerError> {
            Ok(Some(Advance::One(record.clone().with("by", self.name))))
        }
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .with(ByExtension { name: "first", ext: "md" })
            .with(ByExtension { name: "other", ext: "txt" })
            .with(ByExtension { name: "second", ext: "md" })
    }

    #[test]
    fn test_resolve_returns_all_claiming_in_order() {
        let record = PageRecord::new("a.md", Attrs::new());
        let names: Vec<_> = registry()
            .resolve(&record)
            .unwrap()
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_loader_is_first_registered() {
        let record = PageRecord::new("a.md", Attrs::new());
        assert_eq!(registry().loader_for(&record).unwrap().name(), "first");
    }

    #[test]
    fn test_override_restricts_chain() {
        let record = PageRecord::new("a.md", attrs! { "handlers" => "second" });
        let resolved = registry().resolve(&record).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name(), "second");
    }

    #[test]
    fn test_override_with_unknown_handler_fails() {
        let record = PageRecord::new(
            "a.md",
            attrs! { "handlers" => vec![Value::from("first"), Value::from("missing")] },
        );
        assert!(matches!(
            registry().resolve(&record),
            Err(ResolveError::NotRegistered(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_skipped_handlers_never_see_the_record() {
        let cx = BuildContext::new(
            Config::rooted_at("."),
            Arc::new(crate::fs::LocalFs::new(".")),
            registry(),
        );
        let record = PageRecord::new("a.md", Attrs::new());

        let pass = cx.process_skipping(&record, &["first"]).await.unwrap().unwrap();
        assert_eq!(pass.handler, "second");

        let none = cx.process_skipping(&record, &["first", "second"]).await.unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_no_handler() {
        let record = PageRecord::new("a.png", Attrs::new());
        assert!(matches!(
            registry().resolve(&record),
            Err(ResolveError::NoHandler(_))
        ));
    }
}
