use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::markup::{Rule, ScannedLine};

/// Trac wiki markup to MediaWiki markup.
pub static WIKI_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::fixed(r"^\s\s\s\*", "**"),
        Rule::fixed(r"^\s\s\*", "**"),
        Rule::fixed(r"^\s\*", "*"),
        Rule::fixed(r"^\s[0-9]\.", "#"),
        Rule::fixed(r"\{{3}", "<tt>"),
        Rule::fixed(r"\}{3}", "</tt>"),
        Rule::fixed(r"^(.+)::\s*$", ";${1}"),
        Rule::fixed(r"\* (http.*)", "* [${1}]"),
        Rule::fixed(r"\[wiki:([^\s\]]+)\s+([^\]]+)\]", "[[${1}|${2}]]"),
        Rule::fixed(r"\[wiki:(.+?)\]", "[[${1}]]"),
    ]
});

static WIKI_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?[A-Z]+[a-z]+[A-Z][A-Za-z]*")
        .unwrap_or_else(|error| panic!("wiki word regex: {error}"))
});

const ESCAPE_PREFIX: char = '!';
const DEFINITION_TERM: char = ';';
const DEFINITION_CONTINUATION: char = ':';

/// Every page name in the run. Must be complete before the first page body is
/// converted, since any page may link to any other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownPageNames {
    names: BTreeSet<String>,
}

impl KnownPageNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for KnownPageNames {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut known = Self::new();
        for name in iter {
            known.insert(name);
        }
        known
    }
}

/// Splits the line on CamelCase words (keeping them) and rewrites each piece:
/// known page names become `[[Name]]`, `!`-prefixed pieces become `<nowiki>`.
/// A word that already sits inside `[[...]]` is left as is.
pub fn annotate_words(line: &str, known: &KnownPageNames) -> String {
    let mut output = String::with_capacity(line.len());
    let mut cursor = 0usize;
    for found in WIKI_WORD.find_iter(line) {
        output.push_str(&annotate_token(&line[cursor..found.start()], known));
        if is_inside_link(line, found.start(), found.end()) {
            output.push_str(found.as_str());
        } else {
            output.push_str(&annotate_token(found.as_str(), known));
        }
        cursor = found.end();
    }
    output.push_str(&annotate_token(&line[cursor..], known));
    output
}

fn annotate_token<'a>(token: &'a str, known: &KnownPageNames) -> Cow<'a, str> {
    if token.is_empty() {
        return Cow::Borrowed(token);
    }
    if known.contains(token) {
        return Cow::Owned(format!("[[{token}]]"));
    }
    if let Some(rest) = token.strip_prefix(ESCAPE_PREFIX) {
        return Cow::Owned(format!("<nowiki>{rest}</nowiki>"));
    }
    Cow::Borrowed(token)
}

fn is_inside_link(line: &str, start: usize, end: usize) -> bool {
    let after = &line[end..];
    line[..start].ends_with("[[") && (after.starts_with("]]") || after.starts_with('|'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListState {
    #[default]
    Normal,
    InDefinitionList,
}

impl ListState {
    pub fn step(self, line: ScannedLine) -> (Self, String) {
        if line.verbatim {
            return (Self::Normal, line.text);
        }
        let line = line.text;
        if line.starts_with(DEFINITION_TERM) {
            return (Self::InDefinitionList, line);
        }
        match self {
            Self::InDefinitionList => match line.strip_prefix(' ') {
                Some(rest) => (self, format!("{DEFINITION_CONTINUATION}{rest}")),
                None => (Self::Normal, line),
            },
            Self::Normal => (self, line),
        }
    }
}

/// Second pass over already converted lines: indented lines that follow a
/// `;term` line become `:` continuations. Verbatim lines end the list.
pub fn scan_definition_list(lines: Vec<ScannedLine>) -> Vec<String> {
    let mut state = ListState::default();
    let mut output = Vec::with_capacity(lines.len());
    for line in lines {
        let (next, converted) = state.step(line);
        state = next;
        output.push(converted);
    }
    output
}
