use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, Row};
use serde::Serialize;

const ALL_REVISIONS_SQL: &str = "SELECT name, version, author, comment, time, text
     FROM wiki
     ORDER BY name ASC, version ASC";

const LATEST_REVISIONS_SQL: &str = "SELECT name, version, author, comment, time, text
     FROM wiki w
     WHERE version = (SELECT MAX(version) FROM wiki WHERE name = w.name)
     ORDER BY name ASC";

const AUTHORS_SQL: &str = "SELECT DISTINCT author FROM wiki WHERE author IS NOT NULL ORDER BY author ASC";

const ATTACHMENTS_SQL: &str = "SELECT id, filename
     FROM attachment
     WHERE type = 'wiki'
     ORDER BY id ASC, filename ASC";

pub const ANONYMOUS_AUTHOR: &str = "anonymous";

/// One historical version of a wiki page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub page_name: String,
    pub version: u32,
    pub author: String,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub page: String,
    pub filename: String,
}

impl Attachment {
    pub fn raw_url(&self, trac_base: &str) -> String {
        format!(
            "{}/raw-attachment/wiki/{}/{}",
            trac_base.trim_end_matches('/'),
            self.page,
            self.filename
        )
    }
}

/// Read side of a versioned wiki.
pub trait RevisionSource {
    /// Visit every revision in ascending `(page name, version)` order.
    fn for_each_revision(&self, visit: &mut dyn FnMut(Revision) -> Result<()>) -> Result<()>;

    /// Highest-numbered revision of every page, ordered by page name.
    fn latest_revisions(&self) -> Result<Vec<Revision>>;

    /// Distinct author identities, sorted.
    fn authors(&self) -> Result<Vec<String>>;
}

/// Revision source backed by a Trac sqlite3 database export.
pub struct TracExport {
    connection: Connection,
}

impl TracExport {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open trac export {}", path.display()))?;
        Ok(Self { connection })
    }

    pub fn attachments(&self) -> Result<Vec<Attachment>> {
        let mut statement = self
            .connection
            .prepare(ATTACHMENTS_SQL)
            .context("failed to prepare attachment query")?;
        let rows = statement
            .query_map([], |row| {
                Ok(Attachment {
                    page: row.get(0)?,
                    filename: row.get(1)?,
                })
            })
            .context("failed to run attachment query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode attachment row")?);
        }
        Ok(out)
    }
}

impl RevisionSource for TracExport {
    fn for_each_revision(&self, visit: &mut dyn FnMut(Revision) -> Result<()>) -> Result<()> {
        let mut statement = self
            .connection
            .prepare(ALL_REVISIONS_SQL)
            .context("failed to prepare revision query")?;
        let mut rows = statement
            .query([])
            .context("failed to run revision query")?;
        while let Some(row) = rows.next().context("failed to read revision row")? {
            let revision = decode_revision(row).context("failed to decode revision row")?;
            visit(revision)?;
        }
        Ok(())
    }

    fn latest_revisions(&self) -> Result<Vec<Revision>> {
        let mut statement = self
            .connection
            .prepare(LATEST_REVISIONS_SQL)
            .context("failed to prepare latest revision query")?;
        let mut rows = statement
            .query([])
            .context("failed to run latest revision query")?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().context("failed to read latest revision row")? {
            out.push(decode_revision(row).context("failed to decode latest revision row")?);
        }
        Ok(out)
    }

    fn authors(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare(AUTHORS_SQL)
            .context("failed to prepare author query")?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to run author query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode author row")?);
        }
        Ok(out)
    }
}

fn decode_revision(row: &Row<'_>) -> Result<Revision> {
    let page_name: String = row.get(0).context("failed to decode page name")?;
    let version: i64 = row.get(1).context("failed to decode version")?;
    let author: Option<String> = row.get(2).context("failed to decode author")?;
    let comment: Option<String> = row.get(3).context("failed to decode comment")?;
    let time_micros: i64 = row.get(4).context("failed to decode time")?;
    let body: Option<String> = row.get(5).context("failed to decode text")?;

    Ok(Revision {
        version: u32::try_from(version)
            .with_context(|| format!("version {version} of {page_name} is out of range"))?,
        author: author
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
        comment: comment.filter(|value| !value.trim().is_empty()),
        timestamp: timestamp_from_micros(time_micros)
            .with_context(|| format!("invalid timestamp {time_micros} on {page_name}"))?,
        body: body.unwrap_or_default(),
        page_name,
    })
}

/// Trac stores microseconds since the epoch; git only needs whole seconds.
pub fn timestamp_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(micros.div_euclid(1_000_000), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::tempdir;

    const SCHEMA: &str = "
        CREATE TABLE wiki (
            name text, version integer, time integer, author text, ipnr text,
            text text, comment text, readonly integer,
            UNIQUE (name, version)
        );
        CREATE TABLE attachment (
            type text, id text, filename text, size integer, time integer,
            description text, author text, ipnr text,
            UNIQUE (type, id, filename)
        );";

    fn fixture(dir: &Path) -> std::path::PathBuf {
        let db_path = dir.join("trac.db");
        let connection = Connection::open(&db_path).expect("open fixture db");
        connection.execute_batch(SCHEMA).expect("create schema");
        let rows: &[(&str, i64, i64, Option<&str>, Option<&str>, Option<&str>)] = &[
            ("WikiStart", 2, 1_400_000_100_500_000, Some("alice"), None, Some("v2")),
            ("WikiStart", 1, 1_400_000_000_000_000, Some("bob"), Some("first"), Some("v1")),
            ("Docs/Install", 1, 1_400_000_200_000_000, None, Some("  "), None),
        ];
        for (name, version, time, author, comment, text) in rows {
            connection
                .execute(
                    "INSERT INTO wiki (name, version, time, author, ipnr, text, comment, readonly)
                     VALUES (?1, ?2, ?3, ?4, '127.0.0.1', ?5, ?6, 0)",
                    params![name, version, time, author, text, comment],
                )
                .expect("insert wiki row");
        }
        connection
            .execute(
                "INSERT INTO attachment (type, id, filename, size, time, description, author, ipnr)
                 VALUES ('wiki', 'WikiStart', 'logo.png', 10, 0, '', 'alice', '')",
                [],
            )
            .expect("insert wiki attachment");
        connection
            .execute(
                "INSERT INTO attachment (type, id, filename, size, time, description, author, ipnr)
                 VALUES ('ticket', '12', 'trace.txt', 10, 0, '', 'alice', '')",
                [],
            )
            .expect("insert ticket attachment");
        db_path
    }

    #[test]
    fn revisions_arrive_in_name_version_order() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");

        let mut seen = Vec::new();
        export
            .for_each_revision(&mut |revision| {
                seen.push((revision.page_name, revision.version));
                Ok(())
            })
            .expect("iterate revisions");
        assert_eq!(
            seen,
            vec![
                ("Docs/Install".to_string(), 1),
                ("WikiStart".to_string(), 1),
                ("WikiStart".to_string(), 2),
            ]
        );
    }

    #[test]
    fn latest_revisions_pick_the_highest_version() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");
        let latest = export.latest_revisions().expect("latest revisions");
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[1].page_name, "WikiStart");
        assert_eq!(latest[1].version, 2);
        assert_eq!(latest[1].body, "v2");
    }

    #[test]
    fn missing_values_get_fallbacks() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");
        let latest = export.latest_revisions().expect("latest revisions");
        let install = &latest[0];
        assert_eq!(install.author, ANONYMOUS_AUTHOR);
        assert_eq!(install.comment, None);
        assert_eq!(install.body, "");
    }

    #[test]
    fn timestamps_are_truncated_to_seconds() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");
        let latest = export.latest_revisions().expect("latest revisions");
        assert_eq!(latest[1].timestamp.timestamp(), 1_400_000_100);
        assert_eq!(latest[1].timestamp.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn authors_are_distinct_and_sorted() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");
        assert_eq!(export.authors().expect("authors"), vec!["alice", "bob"]);
    }

    #[test]
    fn only_wiki_attachments_are_listed() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");
        let attachments = export.attachments().expect("attachments");
        assert_eq!(attachments.len(), 1);
        assert_eq!(
            attachments[0].raw_url("https://trac.example.org/project/"),
            "https://trac.example.org/project/raw-attachment/wiki/WikiStart/logo.png"
        );
    }

    #[test]
    fn visitor_errors_stop_iteration() {
        let temp = tempdir().expect("tempdir");
        let export = TracExport::open(&fixture(temp.path())).expect("open export");
        let mut calls = 0;
        let error = export
            .for_each_revision(&mut |_| {
                calls += 1;
                anyhow::bail!("sink failed")
            })
            .expect_err("must fail");
        assert_eq!(calls, 1);
        assert!(error.to_string().contains("sink failed"));
    }

    #[test]
    fn open_reports_missing_export() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("missing.db");
        let error = TracExport::open(&missing).err().expect("must fail");
        assert!(error.to_string().contains("failed to open trac export"));
    }
}
