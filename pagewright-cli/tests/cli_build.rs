use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(root: &Path, file: &str, text: &str) -> std::io::Result<()> {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap_or(root))?;
    fs::write(path, text)
}

fn site(root: &Path) -> std::io::Result<()> {
    write(
        root,
        "site.yml",
        "site:\n  title: Test\nbuild:\n  quiescence_timeout_ms: 2000\n",
    )?;
    write(root, "layouts/base.html", "<main>{{ children }}</main>")?;
    write(root, "pages/index.md", "---\nlayout: base\n---\n# Welcome\n")?;
    write(
        root,
        "pages/posts/2024-01-01-first.md",
        "---\nkind: post\n---\nFirst.\n",
    )?;
    write(
        root,
        "pages/posts/2024-02-01-second.md",
        "---\nkind: post\n---\nSecond.\n",
    )?;
    write(root, "static/robots.txt", "User-agent: *\n")
}

#[allow(deprecated)]
fn pagewright() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("pagewright")?;
    cmd.env_remove("PAGEWRIGHT_MODE");
    Ok(cmd)
}

#[test]
fn build_writes_pages_and_static_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    site(dir.path())?;
    write(dir.path(), "out/stale.html", "old")?;

    pagewright()?
        .current_dir(dir.path())
        .arg("build")
        .assert()
        .success()
        .stdout(predicate::str::contains("Built 3 pages (1 static files)"));

    let index = fs::read_to_string(dir.path().join("out/index.html"))?;
    assert!(index.starts_with("<!DOCTYPE html><main><h1 id=\"welcome\">Welcome</h1>"));
    assert!(dir.path().join("out/posts/first/index.html").exists());
    assert!(dir.path().join("out/robots.txt").exists());
    assert!(!dir.path().join("out/stale.html").exists());
    Ok(())
}

#[test]
fn production_build_fails_on_issues() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    site(dir.path())?;
    write(dir.path(), "pages/broken.md", "---\nlayout: missing\n---\nHi\n")?;

    pagewright()?
        .current_dir(dir.path())
        .arg("build")
        .assert()
        .success();

    pagewright()?
        .current_dir(dir.path())
        .env("PAGEWRIGHT_MODE", "production")
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Build failed with 1 issue"));
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write(dir.path(), "site.yml", "build:\n  max_passes: 0\n")?;

    pagewright()?
        .current_dir(dir.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_passes"));
    Ok(())
}

#[test]
fn pages_lists_query_results() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    site(dir.path())?;

    pagewright()?
        .current_dir(dir.path())
        .args(["pages", "--filter", "kind=post", "--sort", "date", "--desc"])
        .assert()
        .success()
        .stdout("/posts/second\tSecond\n/posts/first\tFirst\n");

    let assert = pagewright()?
        .current_dir(dir.path())
        .args(["pages", "--filter", "kind=post", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let value: Value = serde_json::from_str(&stdout)?;
    let pages = value.as_array().expect("json array");
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0]["date"], "2024-01-01");
    Ok(())
}
