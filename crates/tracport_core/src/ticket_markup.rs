use std::sync::LazyLock;

use crate::markup::{ConversionContext, Dialect, Rule, convert_document};
use crate::provenance::{format_author, format_timestamp};
use crate::revisions::RevisionMap;
use crate::trac::{Ticket, TicketComment};

pub const REPORTED_BY: &str = "reported by";
pub const COMMENT_BY: &str = "comment by";

/// Trac ticket markup to GitHub-flavored markdown. Order matters: the indented
/// bullet rules feed each other, and the whole-line fence rules must run before
/// the inline brace rules.
pub static TICKET_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::fixed(r"\[(http[^ ]*) ([^\]]*)\]", "[${2}](${1})"),
        Rule::fixed(r"^\s\s\s\s\*", "\t\t\t*"),
        Rule::fixed(r"^\s\s\s\*", "\t\t*"),
        Rule::fixed(r"^\s\s\*", "\t*"),
        Rule::fixed(r"^\s\*", "*"),
        Rule::fixed(r"^\s\s\s\s[0-9]\.", "    1."),
        Rule::fixed(r"^\s\s[0-9]\.", "  1."),
        Rule::fixed(r"^\s[0-9]\.", "1."),
        Rule::fixed(r"'{5}([^']*)'{5}", "***${1}***"),
        Rule::fixed(r"'{3}([^']*)'{3}", "**${1}**"),
        Rule::fixed(r"'{2}([^']*)'{2}", "*${1}*"),
        Rule::fixed(r"^\s*\{{3}\s*$", "```"),
        Rule::fixed(r"^\s*\}{3}\s*$", "```"),
        Rule::fixed(r"\{{3}", "`"),
        Rule::fixed(r"\}{3}", "`"),
    ]
});

/// Builds issue and comment bodies from Trac ticket rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketConverter<'a> {
    context: ConversionContext<'a>,
}

impl<'a> TicketConverter<'a> {
    pub fn new(revisions: Option<&'a RevisionMap>) -> Self {
        Self {
            context: ConversionContext::default().with_revisions(revisions),
        }
    }

    pub fn convert(&self, text: &str) -> String {
        convert_document(text, Dialect::Ticket, &self.context)
    }

    /// Provenance prefix followed by the converted text.
    pub fn annotated(&self, author: &str, intro: &str, time: &str, text: &str) -> String {
        let mut output = format_author(author, intro);
        let timestamp = format_timestamp(time);
        if !timestamp.is_empty() {
            output.push_str(&timestamp);
            output.push(' ');
        }
        output.push_str(&self.convert(text.trim()));
        output
    }

    pub fn description(&self, ticket: &Ticket) -> String {
        self.annotated(&ticket.reporter, REPORTED_BY, &ticket.time, &ticket.description)
    }

    /// Returns `None` for comments whose body is blank (field changes without text).
    pub fn comment(&self, comment: &TicketComment) -> Option<String> {
        if comment.body.trim().is_empty() {
            return None;
        }
        Some(self.annotated(&comment.author, COMMENT_BY, &comment.time, &comment.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::apply_rules;

    fn rules(line: &str) -> String {
        apply_rules(line, &TICKET_RULES)
    }

    #[test]
    fn web_links_become_markdown_links() {
        assert_eq!(
            rules("see [http://example.org/a?b=1 the docs] now"),
            "see [the docs](http://example.org/a?b=1) now"
        );
        assert_eq!(rules("[https://x.io]"), "[https://x.io]");
    }

    #[test]
    fn single_indent_bullet_loses_its_indent() {
        assert_eq!(rules(" * item"), "* item");
    }

    #[test]
    fn deeper_bullets_cascade_through_later_rules() {
        // Each tab-indented output is itself matched by the next shallower rule.
        assert_eq!(rules("  * nested"), "* nested");
        assert_eq!(rules("    * deep"), "* deep");
        assert_eq!(rules("*not a list item*"), "*not a list item*");
    }

    #[test]
    fn numbered_lists_keep_their_depth() {
        assert_eq!(rules(" 3. third"), "1. third");
        assert_eq!(rules("  2. nested"), "  1. nested");
        assert_eq!(rules("    7. deep"), "    1. deep");
        assert_eq!(rules("   4. odd depth"), "   4. odd depth");
    }

    #[test]
    fn emphasis_markers_become_markdown() {
        assert_eq!(rules("'''''both'''''"), "***both***");
        assert_eq!(rules("'''bold''' and ''it''"), "**bold** and *it*");
        assert_eq!(rules("don't touch"), "don't touch");
    }

    #[test]
    fn braces_become_fences_or_inline_code() {
        assert_eq!(rules("  {{{ "), "```");
        assert_eq!(rules("}}}"), "```");
        assert_eq!(rules("call {{{foo()}}} first"), "call `foo()` first");
    }

    #[test]
    fn annotated_body_has_author_then_time_then_text() {
        let converter = TicketConverter::new(None);
        let body = converter.annotated(
            "bob@example.com",
            REPORTED_BY,
            "0",
            "  '''Crash''' on start\n",
        );
        assert_eq!(
            body,
            "**[reported by bob@...]** *[Trac time 19700101 000000Z]* **Crash** on start"
        );
    }

    #[test]
    fn annotated_body_skips_missing_time() {
        let converter = TicketConverter::new(None);
        let body = converter.annotated("anonymous", COMMENT_BY, "", "hello");
        assert_eq!(body, "hello");
    }

    #[test]
    fn blank_comments_are_skipped() {
        let converter = TicketConverter::new(None);
        let comment = TicketComment {
            author: "alice".to_string(),
            time: "10".to_string(),
            body: "  \n ".to_string(),
        };
        assert!(converter.comment(&comment).is_none());
    }

    #[test]
    fn description_rewrites_revision_citations() {
        let revisions = RevisionMap::from_iter([(42, "abc123".to_string())]);
        let converter = TicketConverter::new(Some(&revisions));
        let ticket = Ticket {
            id: 1,
            summary: "s".to_string(),
            description: "(In [42]) fixed bug".to_string(),
            owner: String::new(),
            reporter: String::new(),
            milestone: String::new(),
            component: String::new(),
            status: "new".to_string(),
            time: "x".to_string(),
        };
        assert_eq!(converter.description(&ticket), "abc123 fixed bug");
    }
}
