//! Filter, sort and neighbour queries over the live page map.

use crate::page_map::PageMap;
use crate::record::PageRecord;
use pagewright_types::{Attrs, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub key: String,
    pub direction: SortDirection,
}

/// Equality filter plus an optional sort key
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Attrs,
    pub sort: Option<SortKey>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(key.to_string(), value.into());
        self
    }

    pub fn sort_by(mut self, key: &str, direction: SortDirection) -> Self {
        self.sort = Some(SortKey {
            key: key.to_string(),
            direction,
        });
        self
    }

    pub fn matches(&self, record: &PageRecord) -> bool {
        self.filter
            .iter()
            .all(|(key, expected)| loosely_equal(&record.field(key), expected))
    }

    /// Filter then stable-sort a set of records
    pub fn apply(&self, records: Vec<PageRecord>) -> Vec<PageRecord> {
        let mut matched: Vec<_> = records.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(sort) = &self.sort {
            matched.sort_by(|a, b| {
                let ord = a.field(&sort.key).total_cmp(&b.field(&sort.key));
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        matched
    }
}

/// Equality that lets numbers match their string spelling
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().is_ok_and(|parsed| parsed == *n)
        }
        _ => actual == expected,
    }
}

/// Read-only query facade; every query waits for the idle signal first
#[derive(Debug, Clone)]
pub struct Search {
    pages: PageMap,
}

impl Search {
    pub fn new(pages: PageMap) -> Self {
        Self { pages }
    }

    pub async fn pages(&self, query: &Query) -> Vec<PageRecord> {
        self.pages.wait_idle().await;
        query.apply(self.pages.snapshot())
    }

    pub async fn previous_page(&self, url: &str, query: &Query) -> Option<PageRecord> {
        self.neighbour(url, query, Ordering::Less).await
    }

    pub async fn next_page(&self, url: &str, query: &Query) -> Option<PageRecord> {
        self.neighbour(url, query, Ordering::Greater).await
    }

    async fn neighbour(&self, url: &str, query: &Query, side: Ordering) -> Option<PageRecord> {
        let mut pages = self.pages(query).await;
        let index = pages.iter().position(|p| p.url() == Some(url))?;
        let target = match side {
            Ordering::Less => index.checked_sub(1)?,
            _ => index + 1,
        };
        if target < pages.len() {
            Some(pages.swap_remove(target))
        } else {
            None
        }
    }
}
