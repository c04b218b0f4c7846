use regex::Regex;

use crate::revisions::{RevisionMap, rewrite_revisions};
use crate::ticket_markup::TICKET_RULES;
use crate::wiki_markup::{KnownPageNames, WIKI_RULES, annotate_words, scan_definition_list};

/// One ordered find/replace step. The replacement may reference capture groups (`${1}`).
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Regex,
    pub replacement: &'static str,
}

impl Rule {
    /// Builds a rule from a pattern that is known at compile time.
    pub fn fixed(pattern: &str, replacement: &'static str) -> Self {
        let pattern = Regex::new(pattern)
            .unwrap_or_else(|error| panic!("invalid markup rule pattern {pattern:?}: {error}"));
        Self {
            pattern,
            replacement,
        }
    }

    pub fn apply(&self, line: &str) -> String {
        self.pattern
            .replace_all(line, self.replacement)
            .into_owned()
    }
}

/// Runs every rule over the current state of the line, in table order.
pub fn apply_rules(line: &str, rules: &[Rule]) -> String {
    let mut current = line.to_string();
    for rule in rules {
        current = rule.apply(&current);
    }
    current
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Trac ticket markup to GitHub-flavored markdown.
    Ticket,
    /// Trac wiki markup to MediaWiki markup.
    Wiki,
}

impl Dialect {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        if value.eq_ignore_ascii_case("ticket") || value.eq_ignore_ascii_case("markdown") {
            return Ok(Self::Ticket);
        }
        if value.eq_ignore_ascii_case("wiki") || value.eq_ignore_ascii_case("mediawiki") {
            return Ok(Self::Wiki);
        }
        anyhow::bail!("unsupported markup dialect: {value} (expected ticket|wiki)")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Wiki => "wiki",
        }
    }

    pub fn rules(self) -> &'static [Rule] {
        match self {
            Self::Ticket => TICKET_RULES.as_slice(),
            Self::Wiki => WIKI_RULES.as_slice(),
        }
    }

    pub fn fence_open(self) -> &'static str {
        match self {
            Self::Ticket => "```",
            Self::Wiki => "<pre>",
        }
    }

    pub fn fence_close(self) -> &'static str {
        match self {
            Self::Ticket => "```",
            Self::Wiki => "</pre>",
        }
    }
}

/// Per-run lookups shared by every document. Both are optional: a missing
/// revision map disables revision rewriting, missing page names disable linking.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionContext<'a> {
    pub revisions: Option<&'a RevisionMap>,
    pub known_pages: Option<&'a KnownPageNames>,
}

impl<'a> ConversionContext<'a> {
    pub fn with_revisions(mut self, revisions: Option<&'a RevisionMap>) -> Self {
        self.revisions = revisions;
        self
    }

    pub fn with_known_pages(mut self, known_pages: &'a KnownPageNames) -> Self {
        self.known_pages = Some(known_pages);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineState {
    #[default]
    Normal,
    InCodeBlock,
}

pub fn is_fence_open(line: &str) -> bool {
    line.trim() == "{{{"
}

pub fn is_fence_close(line: &str) -> bool {
    line.trim() == "}}}"
}

/// One scanner output line. `verbatim` marks fences and code-block contents,
/// which later passes must leave alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedLine {
    pub text: String,
    pub verbatim: bool,
}

impl ScannedLine {
    pub fn converted(text: String) -> Self {
        Self {
            text,
            verbatim: false,
        }
    }

    pub fn verbatim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            verbatim: true,
        }
    }
}

impl LineState {
    /// Consumes one source line and returns the next state plus the output line.
    pub fn step(
        self,
        line: &str,
        dialect: Dialect,
        context: &ConversionContext<'_>,
    ) -> (Self, ScannedLine) {
        if is_fence_open(line) {
            return (Self::InCodeBlock, ScannedLine::verbatim(dialect.fence_open()));
        }
        if is_fence_close(line) {
            return (Self::Normal, ScannedLine::verbatim(dialect.fence_close()));
        }
        match self {
            Self::InCodeBlock => (self, ScannedLine::verbatim(line)),
            Self::Normal => (
                self,
                ScannedLine::converted(convert_line(line, dialect, context)),
            ),
        }
    }
}

/// Converts a single line that is known to be outside a code block.
pub fn convert_line(line: &str, dialect: Dialect, context: &ConversionContext<'_>) -> String {
    let mut converted = apply_rules(line, dialect.rules());
    if let Some(revisions) = context.revisions {
        converted = rewrite_revisions(&converted, revisions);
    }
    if dialect == Dialect::Wiki
        && let Some(known_pages) = context.known_pages
    {
        converted = annotate_words(&converted, known_pages);
    }
    converted
}

/// Converts a whole document. Line state starts at `Normal` for every call and
/// is dropped on return. `\r\n`, `\n` and a lone `\r` all end a line.
pub fn convert_document(text: &str, dialect: Dialect, context: &ConversionContext<'_>) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut state = LineState::default();
    let mut lines = Vec::new();
    for line in text.lines() {
        let (next, scanned) = state.step(line, dialect, context);
        state = next;
        lines.push(scanned);
    }
    match dialect {
        Dialect::Wiki => scan_definition_list(lines).join("\n"),
        Dialect::Ticket => lines
            .into_iter()
            .map(|line| line.text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_run_in_table_order_on_the_current_line() {
        let rules = vec![Rule::fixed("a", "b"), Rule::fixed("b", "c")];
        assert_eq!(apply_rules("aab", &rules), "ccc");

        let reversed = vec![Rule::fixed("b", "c"), Rule::fixed("a", "b")];
        assert_eq!(apply_rules("aab", &reversed), "bbc");
    }

    #[test]
    fn non_matching_rule_is_a_no_op() {
        let rules = vec![Rule::fixed(r"\{{3}", "`")];
        assert_eq!(apply_rules("plain text", &rules), "plain text");
    }

    #[test]
    fn scanner_matches_rule_engine_outside_code_blocks() {
        let context = ConversionContext::default();
        for line in [
            " * item",
            "'''bold''' and ''italic''",
            "see [http://example.org the site]",
            "  2. second",
        ] {
            assert_eq!(
                convert_document(line, Dialect::Ticket, &context),
                apply_rules(line, Dialect::Ticket.rules())
            );
        }
    }

    #[test]
    fn code_block_contents_pass_through_verbatim() {
        let context = ConversionContext::default();
        let text = "{{{\ncode & <html>\n}}}";
        assert_eq!(
            convert_document(text, Dialect::Wiki, &context),
            "<pre>\ncode & <html>\n</pre>"
        );

        let text = "intro '''x'''\n  {{{  \n * not a list ''x''\n}}}\n * list";
        assert_eq!(
            convert_document(text, Dialect::Ticket, &context),
            "intro **x**\n```\n * not a list ''x''\n```\n* list"
        );
    }

    #[test]
    fn code_block_state_does_not_leak_between_documents() {
        let context = ConversionContext::default();
        let unterminated = convert_document("{{{\n'''raw'''", Dialect::Ticket, &context);
        assert_eq!(unterminated, "```\n'''raw'''");

        let next = convert_document("'''bold'''", Dialect::Ticket, &context);
        assert_eq!(next, "**bold**");
    }

    #[test]
    fn revisions_inside_code_blocks_are_untouched() {
        let revisions = RevisionMap::from_iter([(7, "abc123".to_string())]);
        let context = ConversionContext::default().with_revisions(Some(&revisions));
        let output = convert_document(
            "{{{\nsee r7 here\n}}}\nsee r7 here",
            Dialect::Ticket,
            &context,
        );
        assert_eq!(output, "```\nsee r7 here\n```\nsee abc123 here");
    }

    #[test]
    fn carriage_returns_end_lines() {
        let context = ConversionContext::default();
        assert_eq!(
            convert_document("a\rb\r\nc", Dialect::Ticket, &context),
            "a\nb\nc"
        );
        assert_eq!(
            convert_document("{{{\rcode\r}}}", Dialect::Ticket, &context),
            "```\ncode\n```"
        );
    }

    #[test]
    fn dialect_parse_accepts_aliases() {
        assert_eq!(Dialect::parse("Ticket").expect("ticket"), Dialect::Ticket);
        assert_eq!(Dialect::parse("mediawiki").expect("wiki"), Dialect::Wiki);
        assert!(Dialect::parse("rst").is_err());
    }
}
