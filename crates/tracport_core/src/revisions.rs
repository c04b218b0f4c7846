use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(In \[([0-9]+)\]\)(.+)").unwrap_or_else(|error| panic!("citation regex: {error}"))
});
static REVISION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\br([0-9]+)\b").unwrap_or_else(|error| panic!("revision regex: {error}"))
});

const SVN_REVISION_MARKER: &str = "svn-revision:";
const GIT_SVN_ID_MARKER: &str = "git-svn-id:";

/// Subversion revision number to git commit id, built once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionMap {
    entries: BTreeMap<u64, String>,
}

impl RevisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, revision: u64, commit: String) {
        self.entries.insert(revision, commit);
    }

    pub fn get(&self, revision: u64) -> Option<&str> {
        self.entries.get(&revision).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mapped commit id, or a placeholder that still carries the old number.
    pub fn resolve(&self, digits: &str) -> String {
        digits
            .parse::<u64>()
            .ok()
            .and_then(|revision| self.get(revision))
            .map(ToString::to_string)
            .unwrap_or_else(|| unmapped_placeholder(digits))
    }
}

impl FromIterator<(u64, String)> for RevisionMap {
    fn from_iter<I: IntoIterator<Item = (u64, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn unmapped_placeholder(digits: &str) -> String {
    format!("[old svn rev{digits}]")
}

/// Rewrites at most one `(In [N])` citation and at most one `rN` token.
/// Text around both is preserved.
pub fn rewrite_revisions(line: &str, revisions: &RevisionMap) -> String {
    let cited = rewrite_citation(line, revisions).unwrap_or_else(|| line.to_string());
    rewrite_revision_token(&cited, revisions).unwrap_or(cited)
}

fn rewrite_citation(line: &str, revisions: &RevisionMap) -> Option<String> {
    let captures = CITATION.captures(line)?;
    let whole = captures.get(0)?;
    let number = captures.get(1)?;
    let rest = captures.get(2)?;
    Some(format!(
        "{}{}{}",
        &line[..whole.start()],
        revisions.resolve(number.as_str()),
        rest.as_str()
    ))
}

fn rewrite_revision_token(line: &str, revisions: &RevisionMap) -> Option<String> {
    let captures = REVISION_TOKEN.captures(line)?;
    let whole = captures.get(0)?;
    let number = captures.get(1)?;
    Some(format!(
        "{}{}{}",
        &line[..whole.start()],
        revisions.resolve(number.as_str()),
        &line[whole.end()..]
    ))
}

/// Reads `git log` output from a git-svn clone. Both the rewritten
/// `svn-revision: rN` trailer and the stock `git-svn-id: URL@N UUID` line are understood.
pub fn parse_git_log(output: &str) -> RevisionMap {
    let mut revisions = RevisionMap::new();
    let mut commit: Option<String> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("commit ") {
            commit = rest.split_whitespace().next().map(ToString::to_string);
            continue;
        }
        let Some(current) = commit.as_ref() else {
            continue;
        };
        let revision = if let Some(rest) = marker_value(line, SVN_REVISION_MARKER) {
            rest.strip_prefix('r').unwrap_or(rest).parse::<u64>().ok()
        } else if let Some(rest) = marker_value(line, GIT_SVN_ID_MARKER) {
            rest.rsplit_once('@')
                .and_then(|(_, number)| number.parse::<u64>().ok())
        } else {
            continue;
        };
        if let Some(revision) = revision {
            revisions.insert(revision, current.clone());
            commit = None;
        }
    }

    revisions
}

fn marker_value<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let (_, rest) = line.split_once(marker)?;
    rest.split_whitespace().next()
}

pub fn revision_map_from_git_dir(git_dir: &Path) -> Result<RevisionMap> {
    if !git_dir.is_dir() {
        bail!("revision map source is not a directory: {}", git_dir.display());
    }
    let output = Command::new("git")
        .args(["log", "--no-color", "--no-decorate"])
        .current_dir(git_dir)
        .output()
        .with_context(|| format!("failed to run git log in {}", git_dir.display()))?;
    if !output.status.success() {
        bail!(
            "git log failed in {}: {}",
            git_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_git_log(&String::from_utf8_lossy(&output.stdout)))
}
