use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Date format handed to `git commit --date`.
pub const GIT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S +0000";

/// Metadata for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub message: String,
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn batch(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            author: None,
            timestamp: None,
        }
    }
}

/// Write side of the migration: a versioned tree that accepts files and commits.
pub trait SnapshotSink {
    /// Write `contents` to `relative` and stage it.
    fn write_file(&mut self, relative: &str, contents: &str) -> Result<()>;

    /// Move a tracked file, staging the rename.
    fn rename_file(&mut self, from: &str, to: &str) -> Result<()>;

    /// Record everything staged since the previous commit.
    fn commit(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// A git work tree driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitWorkTree {
    root: PathBuf,
    git: PathBuf,
}

impl GitWorkTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            git: PathBuf::from("git"),
        }
    }

    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.git)
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute {}", self.git.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {} failed in {} (exit {}): {}",
                args.first().copied().unwrap_or_default(),
                self.root.display(),
                output.status.code().unwrap_or(1),
                stderr.trim()
            );
        }
        Ok(stdout)
    }
}

impl SnapshotSink for GitWorkTree {
    fn write_file(&mut self, relative: &str, contents: &str) -> Result<()> {
        let absolute = self.root.join(relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(&absolute, contents)
            .with_context(|| format!("failed to write {}", absolute.display()))?;
        self.run(&["add", "--", relative])?;
        debug!(path = relative, "staged page");
        Ok(())
    }

    fn rename_file(&mut self, from: &str, to: &str) -> Result<()> {
        if let Some(parent) = self.root.join(to).parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        self.run(&["mv", "--", from, to])?;
        debug!(from, to, "renamed page");
        Ok(())
    }

    fn commit(&mut self, snapshot: &Snapshot) -> Result<()> {
        let author = snapshot.author.as_deref().map(|author| format!("--author={author}"));
        let date = snapshot
            .timestamp
            .map(|timestamp| format!("--date={}", timestamp.format(GIT_DATE_FORMAT)));

        let mut args = vec!["commit", "--allow-empty", "-q", "-m", snapshot.message.as_str()];
        if let Some(author) = &author {
            args.push(author.as_str());
        }
        if let Some(date) = &date {
            args.push(date.as_str());
        }
        self.run(&args)?;
        debug!(message = %snapshot.message, "committed snapshot");
        Ok(())
    }
}
