use crate::filename::{basename, normalize_page_name};
use crate::paths::{INDEX_PAGE, PathTable};

pub const DEFAULT_TARGET_EXTENSION: &str = ".md";
pub const IMAGE_DIR: &str = "images";
/// GitHub only serves wiki images inline when asked for the raw blob.
pub const IMAGE_CACHE_MARKER: &str = "?raw=True";

const EXTERNAL_PREFIXES: &[&str] = &["http://", "https://", "ftp://", "mailto:"];
const WIKI_SCHEME: &str = "wiki:";

pub fn is_external(target: &str) -> bool {
    EXTERNAL_PREFIXES
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

/// Strip a leading `wiki:` scheme marker.
pub fn strip_wiki_scheme(target: &str) -> &str {
    target.strip_prefix(WIKI_SCHEME).unwrap_or(target)
}

/// Turns Trac link targets into Markdown references using a fixed [`PathTable`].
#[derive(Debug, Clone)]
pub struct LinkResolver<'a> {
    table: &'a PathTable,
    extension: String,
    source_base: Option<String>,
}

impl<'a> LinkResolver<'a> {
    pub fn new(table: &'a PathTable) -> Self {
        Self {
            table,
            extension: DEFAULT_TARGET_EXTENSION.to_string(),
            source_base: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Base URL of the source Trac; image URLs under it are treated as attachments.
    pub fn with_source_base(mut self, base: Option<String>) -> Self {
        self.source_base = base
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn table(&self) -> &PathTable {
        self.table
    }

    /// Resolve a page reference such as `wiki:Foo/Bar#section`.
    ///
    /// Anchors are dropped. Unknown pages resolve to their normalized name, so a
    /// broken link stays broken instead of failing the conversion.
    pub fn resolve(&self, raw: &str) -> String {
        let raw = raw.trim();
        if is_external(raw) {
            return raw.to_string();
        }

        let target = strip_wiki_scheme(raw);
        let page = match target.rfind('#') {
            Some(index) => &target[..index],
            None => target,
        };
        if page.is_empty() {
            // `#section` on its own points into the current page.
            return target.to_string();
        }

        let normalized = normalize_page_name(page);
        let path = match self.table.lookup(&normalized) {
            Some(path) => path.to_string(),
            None if self.table.is_directory(basename(&normalized)) => {
                format!("{normalized}/{INDEX_PAGE}")
            }
            None => normalized,
        };
        format!("{path}{}", self.extension)
    }

    /// Resolve the first argument of an `[[Image(...)]]` macro.
    pub fn resolve_image(&self, raw: &str) -> String {
        let reference = image_reference(raw);

        if let Some(base) = &self.source_base
            && reference.starts_with(base.as_str())
        {
            let name = file_name_of(strip_query(reference));
            return format!("{IMAGE_DIR}/{name}{IMAGE_CACHE_MARKER}");
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }

        let last = reference.rsplit(':').next().unwrap_or(reference);
        let name = file_name_of(strip_query(last));
        format!("{IMAGE_DIR}/{name}{IMAGE_CACHE_MARKER}")
    }
}

/// First macro argument; sizes, `align=` and `nolink` options are dropped.
fn image_reference(raw: &str) -> &str {
    raw.split(|ch: char| ch.is_whitespace() || ch == ',')
        .find(|part| !part.is_empty())
        .unwrap_or("")
}

fn strip_query(value: &str) -> &str {
    value.split('?').next().unwrap_or(value)
}

fn file_name_of(value: &str) -> &str {
    value.rsplit('/').next().unwrap_or(value)
}

/// File name shown as alt text for an image reference.
pub fn image_alt_text(raw: &str) -> String {
    let reference = image_reference(raw);
    let last = reference.rsplit(':').next().unwrap_or(reference);
    let name = file_name_of(strip_query(last));
    if name.is_empty() {
        "image".to_string()
    } else {
        name.to_string()
    }
}
