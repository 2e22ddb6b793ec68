//! The page-build orchestrator.
//!
//! [`Pages::init`] walks the pages directory, seeds one record per file and
//! drives every record through its handler chain until nothing claims it.
//! Each pass runs as its own task. Records are published into the
//! [`PageMap`] as soon as they carry a URL, so queries can observe pages that
//! are still in flight. The build is complete once the counting gate drains,
//! or once the restartable deadline sees no activity for a full period.
//!
//! Per-file problems never abort the build. They are logged and collected
//! into the [`BuildReport`]; in production mode any issue fails the report.

use crate::config::{BuildMode, Config, ConfigError};
use crate::fs::{DirEntry, EntryKind, LocalFs};
use crate::handler::{Advance, BuildContext, HandlerError, ResolveError};
use crate::handlers;
use crate::merge::merge;
use crate::output;
use crate::page_map::PageMap;
use crate::quiescence::{CountingGate, GateError, IdleMonitor, RestartableDeadline};
use crate::record::PageRecord;
use crate::search::Search;
use futures::future::BoxFuture;
use futures::FutureExt;
use pagewright_types::{Attrs, RecordId};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NoHandler,
    MissingUrl,
    HandlerFailed,
    DataFile,
    Unreadable,
    PassLimit,
    AfterPass,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::NoHandler => "no handler",
            IssueKind::MissingUrl => "missing url",
            IssueKind::HandlerFailed => "handler failed",
            IssueKind::DataFile => "data file",
            IssueKind::Unreadable => "unreadable",
            IssueKind::PassLimit => "pass limit",
            IssueKind::AfterPass => "after initial pass",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildIssue {
    pub kind: IssueKind,
    pub file: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub pages: usize,
    pub issues: Vec<BuildIssue>,
    /// The deadline fired before in-flight work drained
    pub timed_out: bool,
    pub mode: BuildMode,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn is_failed(&self) -> bool {
        self.mode == BuildMode::Production && !self.issues.is_empty()
    }
}

/// Where a record came from; informational only
#[derive(Debug, Clone, Serialize)]
pub struct Lineage {
    pub id: RecordId,
    pub parent: Option<RecordId>,
    pub filename: PathBuf,
    pub handler: Option<String>,
    /// Cumulative handler time along the chain
    pub processing_time: Duration,
}

/// One settle phase: its own gate and deadline
struct Round {
    gate: CountingGate,
    deadline: RestartableDeadline,
    monitor: Arc<IdleMonitor>,
}

/// Holds one unit of the round's gate; releasing it always decrements
struct PassGuard {
    round: Arc<Round>,
}

impl PassGuard {
    fn enter(round: &Arc<Round>) -> Self {
        round.gate.increment();
        Self {
            round: Arc::clone(round),
        }
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if let Err(e) = self.round.gate.decrement() {
            tracing::error!("Pass bookkeeping broken: {}", e);
        }
        self.round.deadline.restart();
        self.round.monitor.mark_active();
    }
}

/// Inherited data for a directory subtree
#[derive(Clone)]
struct DirContext {
    id: Option<RecordId>,
    attrs: Attrs,
}

struct Inner {
    cx: BuildContext,
    lineage: Mutex<HashMap<RecordId, Lineage>>,
    issues: Mutex<Vec<BuildIssue>>,
    building: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct Pages {
    inner: Arc<Inner>,
}

impl Pages {
    pub fn new(cx: BuildContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                cx,
                lineage: Mutex::new(HashMap::new()),
                issues: Mutex::new(Vec::new()),
                building: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Orchestrator over the local disk with the configured handlers
    pub fn from_config(config: Config) -> Result<Self, BuildError> {
        config.validate()?;
        let registry = handlers::registry_from_config(&config)?;
        let fs = Arc::new(LocalFs::new(config.root()));
        Ok(Self::new(BuildContext::new(config, fs, registry)))
    }

    pub fn context(&self) -> &BuildContext {
        &self.inner.cx
    }

    pub fn config(&self) -> &Config {
        &self.inner.cx.config
    }

    pub fn pages(&self) -> &PageMap {
        &self.inner.cx.pages
    }

    pub fn search(&self) -> Search {
        self.inner.cx.search()
    }

    pub fn issues(&self) -> Vec<BuildIssue> {
        self.inner.issues.lock().clone()
    }

    /// Lineage of record `id`, newest first
    pub fn lineage(&self, id: RecordId) -> Vec<Lineage> {
        let lineage = self.inner.lineage.lock();
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(id) = next {
            let Some(entry) = lineage.get(&id) else {
                break;
            };
            if chain.len() > lineage.len() {
                break;
            }
            next = entry.parent;
            chain.push(entry.clone());
        }
        chain
    }

    /// Render a published page on demand
    pub async fn render(&self, url: &str) -> Result<Option<String>, HandlerError> {
        match self.pages().get(url) {
            Some(record) => output::render_page(&self.inner.cx, &record).await,
            None => Ok(None),
        }
    }

    /// Rebuild the page map from scratch
    pub async fn init(&self) -> Result<BuildReport, BuildError> {
        let _building = self.inner.building.lock().await;
        let cx = &self.inner.cx;
        cx.config.validate()?;
        let started = Instant::now();

        cx.pages.clear();
        self.inner.lineage.lock().clear();
        self.inner.issues.lock().clear();

        cx.pages.idle().set(false);
        let monitor = Arc::new(IdleMonitor::new(cx.pages.idle().clone()));
        let ticker = monitor.spawn(cx.config.idle_poll());

        let outcome = self.run_rounds(&monitor).await;

        ticker.abort();
        cx.pages.idle().set(true);
        let timed_out = outcome?;

        let report = BuildReport {
            pages: cx.pages.len(),
            issues: self.issues(),
            timed_out,
            mode: cx.config.mode,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Built {} pages in {:.2?} ({} issues)",
            report.pages,
            report.elapsed,
            report.issues.len()
        );
        Ok(report)
    }

    fn round(&self, monitor: &Arc<IdleMonitor>) -> Arc<Round> {
        Arc::new(Round {
            gate: CountingGate::new(),
            deadline: RestartableDeadline::new(self.inner.cx.config.quiescence_timeout()),
            monitor: Arc::clone(monitor),
        })
    }

    async fn run_rounds(&self, monitor: &Arc<IdleMonitor>) -> Result<bool, BuildError> {
        let cx = &self.inner.cx;

        let initial = self.round(monitor);
        {
            // The walk holds its own token so the gate cannot drain mid-walk
            let _walk = PassGuard::enter(&initial);
            let root = DirContext {
                id: None,
                attrs: Attrs::new(),
            };
            self.walk(&initial, cx.config.pages_dir(), root).await;
            initial.deadline.restart();
        }
        let mut timed_out = self.settle(&initial).await?;
        tracing::debug!("Initial pass settled with {} pages", cx.pages.len());

        let followup = self.round(monitor);
        for handler in cx.registry.handlers() {
            match handler.after_initial_pass(cx).await {
                Ok(records) => {
                    for record in records {
                        self.record_lineage(&record, None, Some(handler.name()), Duration::ZERO);
                        cx.pages.publish(record.clone());
                        self.submit(&followup, record, 0);
                    }
                }
                Err(e) => self.issue(IssueKind::AfterPass, Path::new(handler.name()), e.to_string()),
            }
        }
        // Time spent in the hooks themselves is not inactivity
        followup.deadline.restart();
        timed_out |= self.settle(&followup).await?;

        Ok(timed_out)
    }

    /// Race the gate draining against the inactivity deadline
    async fn settle(&self, round: &Round) -> Result<bool, BuildError> {
        if round.gate.count() == 0 && !round.gate.is_drained() {
            return Ok(false);
        }
        tokio::select! {
            biased;
            drained = round.gate.drained() => {
                drained?;
                Ok(false)
            }
            elapsed = round.deadline.expired() => {
                tracing::warn!(
                    "Stopped waiting with {} passes in flight: {}",
                    round.gate.count(),
                    elapsed
                );
                Ok(true)
            }
        }
    }

    fn walk<'a>(
        &'a self,
        round: &'a Arc<Round>,
        dir: PathBuf,
        ctx: DirContext,
    ) -> BoxFuture<'a, ()> {
        async move {
            let cx = &self.inner.cx;
            let entries = match cx.fs.list(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.issue(IssueKind::Unreadable, &dir, e.to_string());
                    return;
                }
            };

            let prefix = cx.config.build.data_file_prefix.as_str();
            let is_data = |entry: &DirEntry| {
                entry.kind == EntryKind::File && entry.name.starts_with(prefix)
            };

            let mut ctx = ctx;
            for entry in entries.iter().filter(|e| is_data(e)) {
                ctx = self.load_data_file(&ctx, &entry.path).await;
            }

            for entry in entries {
                if entry.name.starts_with('.') || is_data(&entry) {
                    continue;
                }
                match entry.kind {
                    EntryKind::Dir => self.walk(round, entry.path, ctx.clone()).await,
                    EntryKind::File => {
                        let record = PageRecord::new(entry.path, ctx.attrs.clone());
                        self.record_lineage(&record, ctx.id, None, Duration::ZERO);
                        self.submit(round, record, 0);
                    }
                }
            }
        }
        .boxed()
    }

    /// Run a shared-data file through one pass and merge it into the context
    async fn load_data_file(&self, ctx: &DirContext, path: &Path) -> DirContext {
        let cx = &self.inner.cx;
        let seed = PageRecord::new(path, ctx.attrs.clone());
        let problem = match cx.process_once(&seed).await {
            Ok(Some(pass)) => match pass.output {
                Advance::One(data) => {
                    self.record_lineage(&data, ctx.id, Some(&pass.handler), pass.elapsed);
                    tracing::debug!("Loaded shared data from {}", path.display());
                    return DirContext {
                        id: Some(data.id),
                        attrs: merge(&ctx.attrs, &data.attrs),
                    };
                }
                Advance::Many(_) => "data file produced several records".to_string(),
            },
            Ok(None) => "no handler could load the data file".to_string(),
            Err(e) => e.to_string(),
        };
        self.issue(IssueKind::DataFile, path, problem);
        ctx.clone()
    }

    fn submit(&self, round: &Arc<Round>, record: PageRecord, passes: usize) {
        let guard = PassGuard::enter(round);
        let pages = self.clone();
        let round = Arc::clone(round);
        tokio::spawn(async move {
            let _guard = guard;
            let filename = record.filename.clone();
            let published = record.url().map(|url| (url.to_string(), record.id));
            let pass = AssertUnwindSafe(pages.run_pass(&round, record, passes));
            if let Err(panic) = pass.catch_unwind().await {
                if let Some((url, id)) = published {
                    pages.inner.cx.pages.evict(&url, id);
                }
                pages.issue(
                    IssueKind::HandlerFailed,
                    &filename,
                    format!("handler panicked: {}", panic_message(panic.as_ref())),
                );
            }
        });
    }

    async fn run_pass(&self, round: &Arc<Round>, record: PageRecord, passes: usize) {
        let cx = &self.inner.cx;
        if passes >= cx.config.build.max_passes {
            self.drop_record(&record);
            self.issue(
                IssueKind::PassLimit,
                &record.filename,
                format!("still changing after {} passes", passes),
            );
            return;
        }

        match cx.process_once(&record).await {
            Ok(Some(pass)) => {
                let parent_time = self.processing_time(record.id);
                // Superseded by whatever the pass produced
                self.drop_record(&record);
                for mut child in pass.output.into_records() {
                    child.id = RecordId::next();
                    self.record_lineage(
                        &child,
                        Some(record.id),
                        Some(&pass.handler),
                        parent_time + pass.elapsed,
                    );
                    cx.pages.publish(child.clone());
                    self.submit(round, child, passes + 1);
                }
            }
            Ok(None) => self.finish(record, passes),
            Err(e) => {
                self.drop_record(&record);
                self.issue(IssueKind::HandlerFailed, &record.filename, e.to_string());
            }
        }
    }

    fn finish(&self, record: PageRecord, passes: usize) {
        let cx = &self.inner.cx;
        if let Some(url) = record.url() {
            tracing::debug!("{} is terminal at {}", record.filename.display(), url);
            cx.pages.publish(record);
        } else if passes == 0
            && matches!(cx.registry.resolve(&record), Err(ResolveError::NoHandler(_)))
        {
            self.issue(
                IssueKind::NoHandler,
                &record.filename,
                "no handler claims this file".to_string(),
            );
        } else {
            self.issue(
                IssueKind::MissingUrl,
                &record.filename,
                "skipping page without a URL".to_string(),
            );
        }
    }

    fn drop_record(&self, record: &PageRecord) {
        if let Some(url) = record.url() {
            self.inner.cx.pages.evict(url, record.id);
        }
    }

    fn issue(&self, kind: IssueKind, file: &Path, message: String) {
        if self.inner.cx.is_production() {
            tracing::error!("{} ({}): {}", file.display(), kind, message);
        } else {
            tracing::warn!("{} ({}): {}", file.display(), kind, message);
        }
        self.inner.issues.lock().push(BuildIssue {
            kind,
            file: file.to_path_buf(),
            message,
        });
    }

    fn record_lineage(
        &self,
        record: &PageRecord,
        parent: Option<RecordId>,
        handler: Option<&str>,
        processing_time: Duration,
    ) {
        self.inner.lineage.lock().insert(
            record.id,
            Lineage {
                id: record.id,
                parent,
                filename: record.filename.clone(),
                handler: handler.map(str::to_string),
                processing_time,
            },
        );
    }

    fn processing_time(&self, id: RecordId) -> Duration {
        self.inner
            .lineage
            .lock()
            .get(&id)
            .map(|l| l.processing_time)
            .unwrap_or_default()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}
