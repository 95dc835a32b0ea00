use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::inline::rewrite_line;
use crate::links::LinkResolver;

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\{(.*?)\}\}\}").expect("valid inline code regex"));
static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{\{\n(?:(.*?)\n)?\}\}\}").expect("valid code block regex"));
static OUTLINE_MACROS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[(?:TOC[^\]]*|PageOutline(?:\([^\]]*\))?)\]\]").expect("valid outline regex")
});
static HEADINGS: LazyLock<Vec<(usize, Regex)>> = LazyLock::new(|| {
    (1..=4)
        .rev()
        .map(|level| {
            let pattern = format!(
                r"(?m)^[ \t]*={{{level}}}[ \t]+(.+?)[ \t]+={{{level}}}([ \t]*#.*|[ \t].*)?$"
            );
            (level, Regex::new(&pattern).expect("valid heading regex"))
        })
        .collect()
});
static BULLETS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [(7, 8, "**** "), (5, 6, "*** "), (3, 4, "** "), (1, 2, "* ")]
        .into_iter()
        .map(|(min, max, marker)| {
            let pattern = format!(r"(?m)^ {{{min},{max}}}\* ");
            (Regex::new(&pattern).expect("valid bullet regex"), marker)
        })
        .collect()
});
static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ \d+\. ").expect("valid numbered list regex"));
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)\[\[br\]\][ \t]*$").expect("valid line break regex"));

const CODE_INDENT: &str = "    ";
const TABLE_CELL: &str = "||";

/// Rewrites Trac wiki pages as Markdown.
///
/// Pass order matters: code is protected before anything else looks at the
/// text, headings are rewritten before list markers, and inline constructs are
/// handled last, line by line.
#[derive(Debug, Clone)]
pub struct Transcoder<'a> {
    resolver: LinkResolver<'a>,
}

impl<'a> Transcoder<'a> {
    pub fn new(resolver: LinkResolver<'a>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &LinkResolver<'a> {
        &self.resolver
    }

    pub fn transcode(&self, body: &str) -> String {
        let text = body.replace("\r\n", "\n");
        let text = INLINE_CODE.replace_all(&text, "`${1}`");

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for caps in CODE_BLOCK.captures_iter(&text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&self.transcode_prose(&text[cursor..whole.start()]));
            if let Some(content) = caps.get(1) {
                out.push_str(&indent_code(content.as_str()));
            }
            cursor = whole.end();
        }
        out.push_str(&self.transcode_prose(&text[cursor..]));
        out
    }

    fn transcode_prose(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let text = OUTLINE_MACROS.replace_all(text, "");
        let text = convert_headings(text);
        let text = convert_bullets(text);
        let text = NUMBERED.replace_all(&text, "1. ").into_owned();
        let text = LINE_BREAK.replace_all(&text, "  ").into_owned();
        let text = convert_tables(&text);

        text.split('\n')
            .map(|line| {
                if is_blockquote_line(line) {
                    Cow::Borrowed(line)
                } else {
                    Cow::Owned(rewrite_line(line, &self.resolver))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn indent_code(content: &str) -> String {
    let indented = content.replace('\n', &format!("\n{CODE_INDENT}"));
    format!("\n{CODE_INDENT}{indented}")
}

fn convert_headings(text: Cow<'_, str>) -> String {
    let mut text = text.into_owned();
    for (level, pattern) in HEADINGS.iter() {
        let marker = "#".repeat(*level);
        text = pattern
            .replace_all(&text, |caps: &Captures| {
                let title = caps.get(1).map_or("", |m| m.as_str());
                let trailing = caps.get(2).map_or("", |m| m.as_str().trim());
                if trailing.is_empty() {
                    format!("{marker} {title}")
                } else {
                    format!("{marker} {title}\n{trailing}")
                }
            })
            .into_owned();
    }
    text
}

fn convert_bullets(mut text: String) -> String {
    for (pattern, marker) in BULLETS.iter() {
        text = pattern.replace_all(&text, *marker).into_owned();
    }
    text
}

/// Rewrite runs of `||`-delimited lines as pipe tables. The first row becomes the
/// header and fixes the column count of the separator row.
fn convert_tables(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();
    for line in text.split('\n') {
        if is_table_row(line) {
            run.push(table_cells(line));
            continue;
        }
        flush_table(&mut run, &mut out);
        out.push(line.to_string());
    }
    flush_table(&mut run, &mut out);
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    line.trim_start().starts_with(TABLE_CELL)
}

fn table_cells(line: &str) -> Vec<String> {
    let row = line.trim();
    let row = row.strip_prefix(TABLE_CELL).unwrap_or(row);
    let row = row.strip_suffix(TABLE_CELL).unwrap_or(row);
    row.split(TABLE_CELL).map(clean_cell).collect()
}

/// Strip `=` header markers and escape pipes so each cell stays one column.
fn clean_cell(cell: &str) -> String {
    let cell = cell.trim();
    let cell = if cell.len() >= 2 && cell.starts_with('=') && cell.ends_with('=') {
        cell.trim_matches('=').trim()
    } else {
        cell
    };
    cell.replace('|', "\\|")
}

fn flush_table(run: &mut Vec<Vec<String>>, out: &mut Vec<String>) {
    if run.is_empty() {
        return;
    }
    let columns = run[0].len();
    for (index, cells) in run.drain(..).enumerate() {
        out.push(format!("| {} |", cells.join(" | ")));
        if index == 0 {
            out.push(format!("|{}", " --- |".repeat(columns)));
        }
    }
}

/// A line indented by four or more spaces reads as quoted/preformatted text,
/// unless what follows the indentation is a list or heading marker.
pub fn is_blockquote_line(line: &str) -> bool {
    if !line.starts_with(CODE_INDENT) {
        return false;
    }
    let trimmed = line.trim();
    match trimmed.chars().next() {
        None => false,
        Some('*' | '-' | '=' | '#') => false,
        Some(_) => !starts_numbered_item(trimmed),
    }
}

fn starts_numbered_item(trimmed: &str) -> bool {
    trimmed
        .split_once(". ")
        .is_some_and(|(number, _)| !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()))
}
