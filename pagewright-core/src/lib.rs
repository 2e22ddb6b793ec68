//! # pagewright-core
//!
//! Core library for the pagewright page-build orchestrator.
//!
//! Every source file becomes a [`PageRecord`] that is handed to a chain of
//! handlers, one pass at a time, until no handler claims it. Finished records
//! are published into a [`PageMap`] keyed by URL. A build is complete when
//! every pass has drained or the quiescence deadline expires.

pub mod config;
pub mod frontmatter;
pub mod fs;
pub mod handler;
pub mod handlers;
pub mod layout;
pub mod merge;
pub mod output;
pub mod page_map;
pub mod pages;
pub mod quiescence;
pub mod record;
pub mod redirects;
pub mod search;
pub mod slug;

pub use config::{BuildMode, Config};
pub use handler::{BuildContext, Handler, HandlerRegistry};
pub use page_map::PageMap;
pub use pages::{BuildIssue, BuildReport, Pages};
pub use record::{Content, Node, PageRecord};
pub use redirects::Redirects;
pub use search::{Query, Search, SortDirection};
pub use slug::slugify;

pub use pagewright_types::{attrs, Attrs, Value};
