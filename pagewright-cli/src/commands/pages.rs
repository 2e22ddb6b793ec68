//! Page listing command.

use super::build::print_report;
use anyhow::{Context, Result};
use pagewright_core::{Config, Pages, Query, SortDirection, Value};

pub struct PagesOptions {
    pub filters: Vec<String>,
    pub sort: Option<String>,
    pub desc: bool,
    pub json: bool,
}

fn build_query(opts: &PagesOptions) -> Result<Query> {
    let mut query = Query::new();
    for filter in &opts.filters {
        let (key, value) = filter
            .split_once('=')
            .with_context(|| format!("Filter `{}` must look like key=value", filter))?;
        query = query.filter(key.trim(), value.trim());
    }
    if let Some(key) = &opts.sort {
        let direction = if opts.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        query = query.sort_by(key, direction);
    }
    Ok(query)
}

/// Build in memory and print the pages matching the query
pub async fn list_pages(config: Config, opts: PagesOptions) -> Result<()> {
    let query = build_query(&opts)?;
    let pages = Pages::from_config(config).context("Failed to set up build")?;
    let report = pages.init().await.context("Build failed")?;
    print_report(&report);

    let found = pages.search().pages(&query).await;
    if opts.json {
        let entries: Vec<Value> = found
            .into_iter()
            .map(|record| Value::Map(record.attrs))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for record in &found {
        println!(
            "{}\t{}",
            record.url().unwrap_or_default(),
            record.title().unwrap_or_default()
        );
    }
    if report.is_failed() {
        anyhow::bail!("Build failed with {} issue(s)", report.issues.len());
    }
    Ok(())
}
