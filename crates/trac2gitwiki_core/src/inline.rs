use std::sync::LazyLock;

use regex::Regex;

use crate::links::{LinkResolver, image_alt_text, is_external, strip_wiki_scheme};

static CAMEL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Z][a-z0-9]+){2,}").expect("valid camel case regex"));
static IMAGE_MACRO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Image\((.*)\)$").expect("valid image macro regex"));

/// One parsed piece of a Trac line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inline<'a> {
    Text(&'a str),
    /// Backtick span, copied verbatim.
    Code(&'a str),
    Link(Link<'a>),
    /// Argument list of an `[[Image(...)]]` macro.
    Image(&'a str),
    /// Token written with a leading `!` to suppress auto-linking.
    Escaped(&'a str),
    Emphasis(Emphasis),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<'a> {
    pub target: &'a str,
    pub label: Option<&'a str>,
}

impl Link<'_> {
    pub fn kind(&self) -> LinkKind {
        if is_external(self.target) {
            LinkKind::External
        } else if self.label.is_some() {
            LinkKind::Full
        } else {
            LinkKind::Simple
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Simple,
    Full,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Italic,
    Bold,
    BoldItalic,
}

impl Emphasis {
    fn slot(self) -> usize {
        match self {
            Self::Italic => 0,
            Self::Bold => 1,
            Self::BoldItalic => 2,
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Italic => "''",
            Self::Bold => "'''",
            Self::BoldItalic => "'''''",
        }
    }

    fn open(self) -> &'static str {
        match self {
            Self::Italic => "_",
            Self::Bold => "**",
            Self::BoldItalic => "**_",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Self::Italic => "_",
            Self::Bold => "**",
            Self::BoldItalic => "_**",
        }
    }
}

struct Parser<'a> {
    line: &'a str,
    nodes: Vec<Inline<'a>>,
    text_start: usize,
}

impl<'a> Parser<'a> {
    fn flush(&mut self, until: usize) {
        if until > self.text_start {
            self.nodes.push(Inline::Text(&self.line[self.text_start..until]));
        }
    }

    fn emit(&mut self, at: usize, node: Inline<'a>, resume: usize) {
        self.flush(at);
        self.nodes.push(node);
        self.text_start = resume;
    }
}

/// Split one line into inline nodes. Total: anything unrecognized is text.
pub fn parse_line(line: &str) -> Vec<Inline<'_>> {
    let bytes = line.as_bytes();
    let mut parser = Parser {
        line,
        nodes: Vec::new(),
        text_start: 0,
    };
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        match bytes[cursor] {
            b'`' => {
                if let Some(len) = line[cursor + 1..].find('`') {
                    let end = cursor + len + 2;
                    parser.emit(cursor, Inline::Code(&line[cursor..end]), end);
                    cursor = end;
                    continue;
                }
            }
            b'[' if line[cursor..].starts_with("[[") => {
                let Some(len) = line[cursor + 2..].find("]]") else {
                    cursor += 2;
                    continue;
                };
                let inner = &line[cursor + 2..cursor + 2 + len];
                let end = cursor + len + 4;
                match IMAGE_MACRO.captures(inner).and_then(|caps| caps.get(1)) {
                    Some(argument) => {
                        parser.emit(cursor, Inline::Image(argument.as_str()), end);
                    }
                    None => {
                        parser.emit(cursor, Inline::Text(&line[cursor..end]), end);
                    }
                }
                cursor = end;
                continue;
            }
            b'[' => {
                if let Some((link, end)) = parse_bracket(line, cursor) {
                    parser.emit(cursor, Inline::Link(link), end);
                    cursor = end;
                    continue;
                }
            }
            b'!' => {
                let rest = &line[cursor + 1..];
                if let Some(macro_body) = rest.strip_prefix("[[")
                    && let Some(len) = macro_body.find("]]")
                {
                    let end = cursor + len + 5;
                    parser.emit(cursor, Inline::Text(&line[cursor + 1..end]), end);
                    cursor = end;
                    continue;
                }
                if rest.starts_with('[')
                    && !rest.starts_with("[[")
                    && let Some((_, end)) = parse_bracket(line, cursor + 1)
                {
                    parser.emit(cursor, Inline::Text(&line[cursor + 1..end]), end);
                    cursor = end;
                    continue;
                }
                if let Some(word) = CAMEL_CASE.find(rest) {
                    let end = cursor + 1 + word.end();
                    parser.emit(cursor, Inline::Escaped(word.as_str()), end);
                    cursor = end;
                    continue;
                }
            }
            b'\'' => {
                let run = bytes[cursor..]
                    .iter()
                    .take_while(|byte| **byte == b'\'')
                    .count();
                if run >= 2 {
                    let end = cursor + run;
                    let (marker, literal) = match run {
                        2 => (Emphasis::Italic, 0),
                        3 => (Emphasis::Bold, 0),
                        4 => (Emphasis::Bold, 1),
                        _ => (Emphasis::BoldItalic, run - 5),
                    };
                    parser.flush(cursor);
                    if literal > 0 {
                        parser
                            .nodes
                            .push(Inline::Text(&line[cursor..cursor + literal]));
                    }
                    parser.nodes.push(Inline::Emphasis(marker));
                    parser.text_start = end;
                    cursor = end;
                    continue;
                }
            }
            _ => {}
        }
        cursor += 1;
    }
    parser.flush(bytes.len());
    parser.nodes
}

/// Parse `[target]`, `[target label]` or `[wiki:"quoted target" label]` starting
/// at the `[` at `start`. Returns the link and the index just past `]`.
fn parse_bracket(line: &str, start: usize) -> Option<(Link<'_>, usize)> {
    let rest = &line[start + 1..];
    let close = rest.find(']')?;
    let inner = &rest[..close];
    if inner.is_empty() || inner.contains('[') || inner.starts_with(char::is_whitespace) {
        return None;
    }
    let end = start + close + 2;

    let body = strip_wiki_scheme(inner);
    if let Some(quoted) = body.strip_prefix('"') {
        let quote_end = quoted.find('"')?;
        let target = &quoted[..quote_end];
        if target.trim().is_empty() {
            return None;
        }
        let label = non_empty(quoted[quote_end + 1..].trim());
        return Some((Link { target, label }, end));
    }

    let link = match inner.find(char::is_whitespace) {
        Some(split) => Link {
            target: &inner[..split],
            label: non_empty(inner[split..].trim()),
        },
        None => Link {
            target: inner,
            label: None,
        },
    };
    Some((link, end))
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unpaired,
    Open,
    Close,
}

/// Pair emphasis delimiters left to right, one open delimiter per kind.
fn emphasis_roles(nodes: &[Inline<'_>]) -> Vec<Role> {
    let mut roles = vec![Role::Unpaired; nodes.len()];
    let mut open: [Option<usize>; 3] = [None; 3];
    for (index, node) in nodes.iter().enumerate() {
        if let Inline::Emphasis(marker) = node {
            let slot = marker.slot();
            match open[slot].take() {
                Some(opened) => {
                    roles[opened] = Role::Open;
                    roles[index] = Role::Close;
                }
                None => open[slot] = Some(index),
            }
        }
    }
    roles
}

/// Render parsed nodes as Markdown.
pub fn render(nodes: &[Inline<'_>], resolver: &LinkResolver<'_>) -> String {
    let roles = emphasis_roles(nodes);
    let mut out = String::new();
    for (node, role) in nodes.iter().zip(roles) {
        match node {
            Inline::Text(text) | Inline::Code(text) | Inline::Escaped(text) => out.push_str(text),
            Inline::Link(link) => {
                let reference = resolver.resolve(link.target);
                let label = match link.kind() {
                    LinkKind::Simple => strip_wiki_scheme(link.target),
                    LinkKind::Full | LinkKind::External => link.label.unwrap_or(link.target),
                };
                out.push('[');
                out.push_str(label);
                out.push_str("](");
                out.push_str(&reference);
                out.push(')');
            }
            Inline::Image(argument) => {
                out.push_str("![");
                out.push_str(&image_alt_text(argument));
                out.push_str("](");
                out.push_str(&resolver.resolve_image(argument));
                out.push(')');
            }
            Inline::Emphasis(marker) => out.push_str(match role {
                Role::Open => marker.open(),
                Role::Close => marker.close(),
                Role::Unpaired => marker.source(),
            }),
        }
    }
    out
}

/// Parse and render one line.
pub fn rewrite_line(line: &str, resolver: &LinkResolver<'_>) -> String {
    render(&parse_line(line), resolver)
}
