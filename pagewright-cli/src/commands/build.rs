//! Build command implementation.

use anyhow::{Context, Result};
use pagewright_core::output::{copy_static, write_pages};
use pagewright_core::{BuildReport, Config, Pages};
use std::fs;

/// Build every page and write the site to the output directory
pub async fn build_site(config: Config) -> Result<()> {
    let output_dir = config.output_dir();
    let static_dir = config.static_dir();
    tracing::info!("Building site in {} mode", config.mode);

    if output_dir.exists() && output_dir != config.root() {
        fs::remove_dir_all(&output_dir)
            .with_context(|| format!("Failed to clear {}", output_dir.display()))?;
    }

    let pages = Pages::from_config(config).context("Failed to set up build")?;
    let report = pages.init().await.context("Build failed")?;

    let written = write_pages(pages.context(), &output_dir)
        .await
        .context("Failed to write pages")?;
    let copied = copy_static(&static_dir, &output_dir).context("Failed to copy static files")?;

    print_report(&report);
    if report.is_failed() {
        anyhow::bail!("Build failed with {} issue(s)", report.issues.len());
    }

    println!(
        "✓ Built {} pages ({} static files) into {} in {:.2?}",
        written,
        copied,
        output_dir.display(),
        report.elapsed
    );
    Ok(())
}

pub fn print_report(report: &BuildReport) {
    for issue in &report.issues {
        eprintln!(
            "  {} [{}]: {}",
            issue.file.display(),
            issue.kind,
            issue.message
        );
    }
    if report.timed_out {
        eprintln!("  build stopped waiting before every page settled");
    }
}
