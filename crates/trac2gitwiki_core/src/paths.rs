use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::filename::{basename, normalize_page_name};

pub const INDEX_PAGE: &str = "Index";

/// Resolved location of every page, built once from the latest revisions.
///
/// A page whose name is also used as a directory by another page cannot stay a
/// plain file, so it is promoted to `<name>/Index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTable {
    directory_names: BTreeSet<String>,
    path_of: BTreeMap<String, String>,
}

impl PathTable {
    /// Build the table from raw page names. Pure; see [`build_path_table`] for the
    /// variant that also prepares the destination tree.
    pub fn from_page_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: BTreeSet<String> = names
            .into_iter()
            .map(|name| normalize_page_name(name.as_ref()))
            .collect();

        let mut directory_names = BTreeSet::new();
        for name in &normalized {
            let segments: Vec<&str> = name.split('/').collect();
            if segments.len() < 2 {
                continue;
            }
            for segment in &segments[..segments.len() - 1] {
                if !segment.is_empty() {
                    directory_names.insert((*segment).to_string());
                }
            }
        }

        let mut path_of = BTreeMap::new();
        for name in normalized {
            let promoted =
                directory_names.contains(basename(&name)) || directory_names.contains(&name);
            let path = if promoted {
                format!("{name}/{INDEX_PAGE}")
            } else {
                name.clone()
            };
            path_of.insert(name, path);
        }

        Self {
            directory_names,
            path_of,
        }
    }

    /// Assemble a table from precomputed parts.
    pub fn from_parts(
        directory_names: BTreeSet<String>,
        path_of: BTreeMap<String, String>,
    ) -> Self {
        Self {
            directory_names,
            path_of,
        }
    }

    pub fn is_directory(&self, segment: &str) -> bool {
        self.directory_names.contains(segment)
    }

    pub fn directory_names(&self) -> &BTreeSet<String> {
        &self.directory_names
    }

    /// Mapped path for a normalized page name, if the page exists.
    pub fn lookup(&self, normalized: &str) -> Option<&str> {
        self.path_of.get(normalized).map(String::as_str)
    }

    /// Mapped path for a normalized page name, falling back to the name itself.
    pub fn path_or_name<'a>(&'a self, normalized: &'a str) -> &'a str {
        self.lookup(normalized).unwrap_or(normalized)
    }

    pub fn len(&self) -> usize {
        self.path_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_of.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.path_of
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_str()))
    }

    /// Create every parent directory the mapping needs under `root`. Returns the
    /// number of directories that did not exist before.
    pub fn materialize(&self, root: &Path) -> Result<usize> {
        for (_, path) in self.entries() {
            ensure_plain_relative(path)?;
        }

        let mut created = 0usize;
        let parents: BTreeSet<&Path> = self
            .path_of
            .values()
            .filter_map(|path| Path::new(path).parent())
            .filter(|parent| !parent.as_os_str().is_empty())
            .collect();
        for parent in parents {
            let absolute = root.join(parent);
            if absolute.is_dir() {
                continue;
            }
            fs::create_dir_all(&absolute)
                .with_context(|| format!("failed to create directory {}", absolute.display()))?;
            debug!(directory = %absolute.display(), "created page directory");
            created += 1;
        }
        Ok(created)
    }
}

/// Build the table for `names` and create the directories it requires under `root`.
pub fn build_path_table<I, S>(names: I, root: &Path) -> Result<PathTable>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let table = PathTable::from_page_names(names);
    let created = table.materialize(root)?;
    debug!(
        pages = table.len(),
        directory_names = table.directory_names.len(),
        created_directories = created,
        "built path resolution table"
    );
    Ok(table)
}

fn ensure_plain_relative(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("page maps to an empty path");
    }
    let plain = Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !plain {
        bail!("page path escapes the destination root: {path}");
    }
    Ok(())
}
