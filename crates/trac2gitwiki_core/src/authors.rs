use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

pub const DEFAULT_EMAIL_HOST: &str = "localhost";

/// Trac user names mapped to the e-mail addresses written into commits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorMap {
    emails: BTreeMap<String, String>,
    email_host: String,
}

impl AuthorMap {
    pub fn new(email_host: impl Into<String>) -> Self {
        Self {
            emails: BTreeMap::new(),
            email_host: email_host.into(),
        }
    }

    /// Synthesize `author@host` for every known author.
    pub fn generated<I, S>(authors: I, email_host: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new(email_host);
        for author in authors {
            let author = author.as_ref();
            let email = map.synthesized_email(author);
            map.emails.insert(author.to_string(), email);
        }
        map
    }

    /// Load a headerless `trac_author,email` CSV file.
    pub fn load_csv(path: &Path, email_host: impl Into<String>) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open author map {}", path.display()))?;
        Self::from_reader(file, email_host)
            .with_context(|| format!("failed to read author map {}", path.display()))
    }

    pub fn from_reader<R: std::io::Read>(reader: R, email_host: impl Into<String>) -> Result<Self> {
        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut map = Self::new(email_host);
        for (index, record) in rows.records().enumerate() {
            let record = record.with_context(|| format!("invalid author map row {}", index + 1))?;
            let Some(author) = record.get(0).filter(|value| !value.is_empty()) else {
                continue;
            };
            let email = record.get(1).unwrap_or_default();
            if email.is_empty() {
                continue;
            }
            map.emails.insert(author.to_string(), email.to_string());
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn email(&self, author: &str) -> String {
        match self.emails.get(author) {
            Some(email) => email.clone(),
            None => {
                let email = self.synthesized_email(author);
                debug!(author, email = %email, "author missing from map; synthesized e-mail");
                email
            }
        }
    }

    /// Git identity in `Name <email>` form.
    pub fn identity(&self, author: &str) -> String {
        let name: String = author
            .chars()
            .filter(|ch| *ch != '<' && *ch != '>')
            .collect();
        let name = name.trim();
        format!("{name} <{}>", self.email(author))
    }

    fn synthesized_email(&self, author: &str) -> String {
        let local: String = author
            .trim()
            .chars()
            .map(|ch| if ch.is_whitespace() || ch == '<' || ch == '>' { '_' } else { ch })
            .collect();
        format!("{local}@{}", self.email_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn csv_rows_map_authors_to_emails() {
        let map = AuthorMap::from_reader(
            "alice, alice@example.org\nbob,bob@example.org\n".as_bytes(),
            DEFAULT_EMAIL_HOST,
        )
        .expect("parse map");
        assert_eq!(map.len(), 2);
        assert_eq!(map.identity("alice"), "alice <alice@example.org>");
        assert_eq!(map.identity("bob"), "bob <bob@example.org>");
    }

    #[test]
    fn unmapped_authors_are_synthesized() {
        let map = AuthorMap::from_reader("alice,alice@example.org\n".as_bytes(), "trac.local")
            .expect("parse map");
        assert_eq!(map.identity("carol"), "carol <carol@trac.local>");
    }

    #[test]
    fn rows_without_email_fall_back() {
        let map = AuthorMap::from_reader("dave\nerin,\n".as_bytes(), "example.com")
            .expect("parse map");
        assert!(map.is_empty());
        assert_eq!(map.email("dave"), "dave@example.com");
        assert_eq!(map.email("erin"), "erin@example.com");
    }

    #[test]
    fn generated_map_covers_every_author() {
        let map = AuthorMap::generated(["alice", "John Smith"], DEFAULT_EMAIL_HOST);
        assert_eq!(map.len(), 2);
        assert_eq!(map.identity("alice"), "alice <alice@localhost>");
        assert_eq!(map.identity("John Smith"), "John Smith <John_Smith@localhost>");
    }

    #[test]
    fn angle_brackets_are_stripped_from_names() {
        let map = AuthorMap::new(DEFAULT_EMAIL_HOST);
        assert_eq!(map.identity("<root>"), "root <_root_@localhost>");
    }

    #[test]
    fn load_csv_reports_missing_file() {
        let temp = tempdir().expect("tempdir");
        let error = AuthorMap::load_csv(&temp.path().join("authors.csv"), DEFAULT_EMAIL_HOST)
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to open author map"));
    }

    #[test]
    fn load_csv_reads_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("authors.csv");
        std::fs::write(&path, "alice,a@example.org\n").expect("write map");
        let map = AuthorMap::load_csv(&path, DEFAULT_EMAIL_HOST).expect("load map");
        assert_eq!(map.email("alice"), "a@example.org");
    }
}
