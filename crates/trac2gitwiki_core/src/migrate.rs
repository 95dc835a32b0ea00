use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::authors::AuthorMap;
use crate::filename::normalize_page_name;
use crate::git::{Snapshot, SnapshotSink};
use crate::links::{DEFAULT_TARGET_EXTENSION, LinkResolver};
use crate::paths::{PathTable, build_path_table};
use crate::store::{Revision, RevisionSource};
use crate::transcode::Transcoder;

pub const DEFAULT_RENAME_MESSAGE: &str = "Renaming all files to have .md extension";
pub const DEFAULT_CONVERT_MESSAGE: &str = "Converted to Markdown by trac2gitwiki";
pub const DEFAULT_ADMIN_PREFIXES: &[&str] = &["Trac", "Wiki"];
pub const DEFAULT_ADMIN_EXCEPTIONS: &[&str] = &["WikiStart"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    ResolvingPaths,
    ReplayingHistory,
    Renaming,
    Converting,
    Done,
    Failed,
}

impl MigrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingPaths => "resolving_paths",
            Self::ReplayingHistory => "replaying_history",
            Self::Renaming => "renaming",
            Self::Converting => "converting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Decides which pages belong to Trac itself rather than to the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePolicy {
    pub admin_prefixes: Vec<String>,
    pub admin_exceptions: Vec<String>,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            admin_prefixes: DEFAULT_ADMIN_PREFIXES.iter().map(|p| p.to_string()).collect(),
            admin_exceptions: DEFAULT_ADMIN_EXCEPTIONS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl PagePolicy {
    pub fn is_admin(&self, page_name: &str) -> bool {
        let excepted = self
            .admin_exceptions
            .iter()
            .any(|exception| page_name.starts_with(exception.as_str()));
        !excepted
            && self
                .admin_prefixes
                .iter()
                .any(|prefix| page_name.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    pub destination: PathBuf,
    pub default_comment: Option<String>,
    pub rename_message: String,
    pub convert_message: String,
    pub target_extension: String,
    pub source_base: Option<String>,
    pub replay_admin_history: bool,
    pub policy: PagePolicy,
}

impl MigrationOptions {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            default_comment: None,
            rename_message: DEFAULT_RENAME_MESSAGE.to_string(),
            convert_message: DEFAULT_CONVERT_MESSAGE.to_string(),
            target_extension: DEFAULT_TARGET_EXTENSION.to_string(),
            source_base: None,
            replay_admin_history: false,
            policy: PagePolicy::default(),
        }
    }

    fn comment_for(&self, revision: &Revision) -> String {
        if let Some(comment) = &revision.comment {
            return comment.clone();
        }
        debug!(
            page = %revision.page_name,
            version = revision.version,
            "revision has no comment; using fallback"
        );
        match &self.default_comment {
            Some(comment) => comment.clone(),
            None => format!(
                "Initial load of version {} of trac-file {}",
                revision.version, revision.page_name
            ),
        }
    }
}

/// Counters describing one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub phase: MigrationPhase,
    pub pages: usize,
    pub directory_names: usize,
    pub revisions_replayed: usize,
    pub revisions_skipped: usize,
    pub pages_renamed: usize,
    pub pages_converted: usize,
    pub commits: usize,
}

impl MigrationReport {
    fn new() -> Self {
        Self {
            phase: MigrationPhase::Idle,
            pages: 0,
            directory_names: 0,
            revisions_replayed: 0,
            revisions_skipped: 0,
            pages_renamed: 0,
            pages_converted: 0,
            commits: 0,
        }
    }
}

/// Replays a wiki's history into a sink, then renames and converts the latest
/// version of every project page.
pub struct Migration<'a> {
    source: &'a dyn RevisionSource,
    sink: &'a mut dyn SnapshotSink,
    authors: &'a AuthorMap,
    options: MigrationOptions,
    report: MigrationReport,
}

impl<'a> Migration<'a> {
    pub fn new(
        source: &'a dyn RevisionSource,
        sink: &'a mut dyn SnapshotSink,
        authors: &'a AuthorMap,
        options: MigrationOptions,
    ) -> Self {
        Self {
            source,
            sink,
            authors,
            options,
            report: MigrationReport::new(),
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.report.phase
    }

    /// Run every phase. On error the report phase is left at `Failed` and the
    /// error names the phase that failed.
    pub fn run(&mut self) -> Result<MigrationReport> {
        match self.run_phases() {
            Ok(()) => {
                self.enter(MigrationPhase::Done);
                Ok(self.report.clone())
            }
            Err(err) => {
                let failed_in = self.report.phase;
                error!(phase = failed_in.as_str(), error = %format!("{err:#}"), "migration failed");
                self.report.phase = MigrationPhase::Failed;
                Err(err.context(format!("migration failed while {}", failed_in.as_str())))
            }
        }
    }

    pub fn report(&self) -> &MigrationReport {
        &self.report
    }

    fn enter(&mut self, phase: MigrationPhase) {
        self.report.phase = phase;
        info!(phase = phase.as_str(), "entering migration phase");
    }

    fn run_phases(&mut self) -> Result<()> {
        self.enter(MigrationPhase::ResolvingPaths);
        let latest = self
            .source
            .latest_revisions()
            .context("failed to read latest revisions")?;
        let table = build_path_table(
            latest.iter().map(|revision| revision.page_name.as_str()),
            &self.options.destination,
        )?;
        self.report.pages = table.len();
        self.report.directory_names = table.directory_names().len();

        self.enter(MigrationPhase::ReplayingHistory);
        self.replay(&table)?;

        self.enter(MigrationPhase::Renaming);
        self.rename(&table, &latest)?;

        self.enter(MigrationPhase::Converting);
        self.convert(&table, &latest)?;
        Ok(())
    }

    fn replay(&mut self, table: &PathTable) -> Result<()> {
        let source = self.source;
        let sink = &mut *self.sink;
        let authors = self.authors;
        let options = &self.options;
        let report = &mut self.report;

        source.for_each_revision(&mut |revision| {
            if !options.replay_admin_history && options.policy.is_admin(&revision.page_name) {
                report.revisions_skipped += 1;
                return Ok(());
            }
            let normalized = normalize_page_name(&revision.page_name);
            let path = table.path_or_name(&normalized);
            sink.write_file(path, &revision.body).with_context(|| {
                format!(
                    "failed to write version {} of {}",
                    revision.version, revision.page_name
                )
            })?;
            sink.commit(&Snapshot {
                message: options.comment_for(&revision),
                author: Some(authors.identity(&revision.author)),
                timestamp: Some(revision.timestamp),
            })
            .with_context(|| {
                format!(
                    "failed to commit version {} of {}",
                    revision.version, revision.page_name
                )
            })?;
            report.revisions_replayed += 1;
            report.commits += 1;
            Ok(())
        })?;

        info!(
            replayed = self.report.revisions_replayed,
            skipped = self.report.revisions_skipped,
            "replayed revision history"
        );
        Ok(())
    }

    fn rename(&mut self, table: &PathTable, latest: &[Revision]) -> Result<()> {
        for (path, _) in self.project_pages(table, latest) {
            let renamed = format!("{path}{}", self.options.target_extension);
            self.sink
                .rename_file(&path, &renamed)
                .with_context(|| format!("failed to rename {path} to {renamed}"))?;
            self.report.pages_renamed += 1;
        }
        self.sink
            .commit(&Snapshot::batch(self.options.rename_message.clone()))
            .context("failed to commit renamed pages")?;
        self.report.commits += 1;
        info!(pages = self.report.pages_renamed, "renamed pages");
        Ok(())
    }

    fn convert(&mut self, table: &PathTable, latest: &[Revision]) -> Result<()> {
        let resolver = LinkResolver::new(table)
            .with_extension(self.options.target_extension.clone())
            .with_source_base(self.options.source_base.clone());
        let transcoder = Transcoder::new(resolver);

        for (path, revision) in self.project_pages(table, latest) {
            let path = format!("{path}{}", self.options.target_extension);
            let markdown = transcoder.transcode(&revision.body);
            self.sink
                .write_file(&path, &markdown)
                .with_context(|| format!("failed to write converted page {path}"))?;
            self.report.pages_converted += 1;
        }
        self.sink
            .commit(&Snapshot::batch(self.options.convert_message.clone()))
            .context("failed to commit converted pages")?;
        self.report.commits += 1;
        info!(pages = self.report.pages_converted, "converted pages to markdown");
        Ok(())
    }

    /// Project pages keyed by resolved path. Names that normalize to the same
    /// path collapse to the last one, which is also the last written in replay.
    fn project_pages<'r>(
        &self,
        table: &PathTable,
        latest: &'r [Revision],
    ) -> Vec<(String, &'r Revision)> {
        let mut by_path: BTreeMap<String, &'r Revision> = BTreeMap::new();
        for revision in latest {
            if self.options.policy.is_admin(&revision.page_name) {
                continue;
            }
            let normalized = normalize_page_name(&revision.page_name);
            let path = table.path_or_name(&normalized).to_string();
            if let Some(shadowed) = by_path.insert(path.clone(), revision) {
                warn!(
                    path = %path,
                    kept = %revision.page_name,
                    dropped = %shadowed.page_name,
                    "pages share a path; keeping the later one"
                );
            }
        }
        by_path.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::bail;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    use super::*;

    struct MemorySource {
        revisions: Vec<Revision>,
    }

    impl MemorySource {
        fn new(rows: &[(&str, u32, &str, Option<&str>, &str)]) -> Self {
            let mut revisions: Vec<Revision> = rows
                .iter()
                .map(|(name, version, author, comment, body)| Revision {
                    page_name: (*name).to_string(),
                    version: *version,
                    author: (*author).to_string(),
                    comment: comment.map(str::to_string),
                    timestamp: DateTime::<Utc>::from_timestamp(1_400_000_000 + i64::from(*version), 0)
                        .expect("timestamp"),
                    body: (*body).to_string(),
                })
                .collect();
            revisions.sort_by(|a, b| (&a.page_name, a.version).cmp(&(&b.page_name, b.version)));
            Self { revisions }
        }
    }

    impl RevisionSource for MemorySource {
        fn for_each_revision(&self, visit: &mut dyn FnMut(Revision) -> Result<()>) -> Result<()> {
            for revision in &self.revisions {
                visit(revision.clone())?;
            }
            Ok(())
        }

        fn latest_revisions(&self) -> Result<Vec<Revision>> {
            let mut latest: BTreeMap<String, Revision> = BTreeMap::new();
            for revision in &self.revisions {
                latest.insert(revision.page_name.clone(), revision.clone());
            }
            Ok(latest.into_values().collect())
        }

        fn authors(&self) -> Result<Vec<String>> {
            Ok(self.revisions.iter().map(|r| r.author.clone()).collect())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Write(String, String),
        Rename(String, String),
        Commit(Snapshot),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<Event>,
        fail_on_rename: bool,
    }

    impl RecordingSink {
        fn commits(&self) -> Vec<&Snapshot> {
            self.events
                .iter()
                .filter_map(|event| match event {
                    Event::Commit(snapshot) => Some(snapshot),
                    _ => None,
                })
                .collect()
        }
    }

    impl SnapshotSink for RecordingSink {
        fn write_file(&mut self, relative: &str, contents: &str) -> Result<()> {
            self.events
                .push(Event::Write(relative.to_string(), contents.to_string()));
            Ok(())
        }

        fn rename_file(&mut self, from: &str, to: &str) -> Result<()> {
            if self.fail_on_rename {
                bail!("git mv failed");
            }
            self.events
                .push(Event::Rename(from.to_string(), to.to_string()));
            Ok(())
        }

        fn commit(&mut self, snapshot: &Snapshot) -> Result<()> {
            self.events.push(Event::Commit(snapshot.clone()));
            Ok(())
        }
    }

    fn sample_source() -> MemorySource {
        MemorySource::new(&[
            ("Foo", 1, "alice", Some("created"), "== Foo =="),
            ("Foo", 2, "bob", None, "See [wiki:Foo/Bar]"),
            ("Foo/Bar", 1, "alice", None, "''child''"),
            ("TracGuide", 1, "trac", None, "admin"),
            ("WikiStart", 1, "alice", Some("home"), "[Foo]"),
        ])
    }

    #[test]
    fn full_run_replays_renames_and_converts() {
        let temp = tempdir().expect("tempdir");
        let source = sample_source();
        let mut sink = RecordingSink::default();
        let authors = AuthorMap::generated(["alice", "bob"], "example.org");

        let report = {
            let mut migration =
                Migration::new(&source, &mut sink, &authors, MigrationOptions::new(temp.path()));
            migration.run().expect("migration")
        };

        assert_eq!(report.phase, MigrationPhase::Done);
        assert_eq!(report.pages, 4);
        assert_eq!(report.revisions_replayed, 4);
        assert_eq!(report.revisions_skipped, 1);
        assert_eq!(report.pages_renamed, 3);
        assert_eq!(report.pages_converted, 3);
        assert_eq!(report.commits, 6);
        assert!(temp.path().join("Foo").is_dir());

        let commits = sink.commits();
        assert_eq!(commits.len(), 6);
        assert_eq!(commits[0].message, "created");
        assert_eq!(commits[0].author.as_deref(), Some("alice <alice@example.org>"));
        assert_eq!(commits[1].message, "Initial load of version 2 of trac-file Foo");
        assert_eq!(commits[4].message, DEFAULT_RENAME_MESSAGE);
        assert_eq!(commits[4].author, None);
        assert_eq!(commits[5].message, DEFAULT_CONVERT_MESSAGE);
    }

    #[test]
    fn replay_writes_pages_at_resolved_paths() {
        let temp = tempdir().expect("tempdir");
        let source = sample_source();
        let mut sink = RecordingSink::default();
        let authors = AuthorMap::default();
        Migration::new(&source, &mut sink, &authors, MigrationOptions::new(temp.path()))
            .run()
            .expect("migration");

        assert_eq!(
            sink.events[0],
            Event::Write("Foo/Index".to_string(), "== Foo ==".to_string())
        );
        assert!(sink.events.contains(&Event::Rename(
            "Foo/Index".to_string(),
            "Foo/Index.md".to_string()
        )));
        assert!(sink.events.contains(&Event::Write(
            "Foo/Index.md".to_string(),
            "See [Foo/Bar](Foo/Bar.md)".to_string()
        )));
        assert!(sink.events.contains(&Event::Write(
            "WikiStart.md".to_string(),
            "[Foo](Foo/Index.md)".to_string()
        )));
    }

    #[test]
    fn admin_pages_are_never_renamed_or_converted() {
        let temp = tempdir().expect("tempdir");
        let source = sample_source();
        let mut sink = RecordingSink::default();
        let authors = AuthorMap::default();
        let mut options = MigrationOptions::new(temp.path());
        options.replay_admin_history = true;

        let report = Migration::new(&source, &mut sink, &authors, options)
            .run()
            .expect("migration");
        assert_eq!(report.revisions_replayed, 5);
        assert_eq!(report.revisions_skipped, 0);
        assert!(sink
            .events
            .contains(&Event::Write("TracGuide".to_string(), "admin".to_string())));
        assert!(!sink.events.iter().any(|event| matches!(
            event,
            Event::Rename(from, _) if from == "TracGuide"
        )));
        assert!(!sink
            .events
            .iter()
            .any(|event| matches!(event, Event::Write(path, _) if path == "TracGuide.md")));
    }

    #[test]
    fn default_comment_overrides_generated_message() {
        let temp = tempdir().expect("tempdir");
        let source = MemorySource::new(&[("Page", 1, "alice", None, "x")]);
        let mut sink = RecordingSink::default();
        let authors = AuthorMap::default();
        let mut options = MigrationOptions::new(temp.path());
        options.default_comment = Some("Imported from Trac".to_string());

        Migration::new(&source, &mut sink, &authors, options)
            .run()
            .expect("migration");
        assert_eq!(sink.commits()[0].message, "Imported from Trac");
    }

    #[test]
    fn sink_failure_moves_driver_to_failed() {
        let temp = tempdir().expect("tempdir");
        let source = sample_source();
        let mut sink = RecordingSink {
            fail_on_rename: true,
            ..RecordingSink::default()
        };
        let authors = AuthorMap::default();
        let mut migration =
            Migration::new(&source, &mut sink, &authors, MigrationOptions::new(temp.path()));

        let error = migration.run().expect_err("must fail");
        assert_eq!(migration.phase(), MigrationPhase::Failed);
        assert_eq!(migration.report().pages_converted, 0);
        let message = format!("{error:#}");
        assert!(message.contains("migration failed while renaming"));
        assert!(message.contains("git mv failed"));
    }

    #[test]
    fn pages_sharing_a_path_are_renamed_and_converted_once() {
        let temp = tempdir().expect("tempdir");
        let source = MemorySource::new(&[
            ("Foo Bar", 1, "alice", None, "spaced"),
            ("Foo_Bar", 1, "bob", None, "underscored"),
        ]);
        let mut sink = RecordingSink::default();
        let authors = AuthorMap::default();

        let report = Migration::new(&source, &mut sink, &authors, MigrationOptions::new(temp.path()))
            .run()
            .expect("migration");

        assert_eq!(report.phase, MigrationPhase::Done);
        assert_eq!(report.pages, 1);
        assert_eq!(report.revisions_replayed, 2);
        assert_eq!(report.pages_renamed, 1);
        assert_eq!(report.pages_converted, 1);

        let renames: Vec<&Event> = sink
            .events
            .iter()
            .filter(|event| matches!(event, Event::Rename(..)))
            .collect();
        assert_eq!(
            renames,
            vec![&Event::Rename("Foo_Bar".to_string(), "Foo_Bar.md".to_string())]
        );
        let converted: Vec<&Event> = sink
            .events
            .iter()
            .filter(|event| matches!(event, Event::Write(path, _) if path.ends_with(".md")))
            .collect();
        assert_eq!(
            converted,
            vec![&Event::Write("Foo_Bar.md".to_string(), "underscored".to_string())]
        );
    }

    #[test]
    fn policy_matches_prefixes_with_exceptions() {
        let policy = PagePolicy::default();
        assert!(policy.is_admin("TracGuide"));
        assert!(policy.is_admin("WikiFormatting"));
        assert!(!policy.is_admin("WikiStart"));
        assert!(!policy.is_admin("Docs/TracNotes"));
        assert!(!policy.is_admin("ReleaseNotes"));
    }

    #[test]
    fn phases_render_as_snake_case() {
        assert_eq!(MigrationPhase::ReplayingHistory.as_str(), "replaying_history");
        assert!(MigrationPhase::Failed.is_terminal());
        assert!(!MigrationPhase::Converting.is_terminal());
    }
}
