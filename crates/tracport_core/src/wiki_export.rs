use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::markup::{ConversionContext, Dialect, convert_document};
use crate::revisions::RevisionMap;
use crate::runtime::normalize_for_display;
use crate::trac::TracDb;
use crate::wiki_markup::KnownPageNames;

pub const DEFAULT_EXTENSION: &str = "wiki";
pub const DEFAULT_START_PAGE: &str = "WikiStart";
pub const DEFAULT_HOME_PAGE: &str = "Home";
pub const DEFAULT_OUTPUT_DIR: &str = "wiki";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiExportOptions {
    pub output_dir: PathBuf,
    pub extension: String,
    /// Trac's front page, written under `home_page` instead of its own name.
    pub start_page: String,
    pub home_page: String,
}

impl Default for WikiExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            extension: DEFAULT_EXTENSION.to_string(),
            start_page: DEFAULT_START_PAGE.to_string(),
            home_page: DEFAULT_HOME_PAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedPage {
    pub name: String,
    pub file_name: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WikiExportReport {
    pub output_dir: String,
    pub pages_written: usize,
    pub pages_skipped: usize,
    pub pages: Vec<ExportedPage>,
}

pub fn page_file_name(name: &str, options: &WikiExportOptions) -> String {
    let stem = if name == options.start_page {
        options.home_page.clone()
    } else {
        name.replace('/', "-")
    };
    match options.extension.trim().trim_start_matches('.') {
        "" => stem,
        extension => format!("{stem}.{extension}"),
    }
}

/// Converted page body, newline terminated.
pub fn convert_wiki_page(text: &str, context: &ConversionContext<'_>) -> String {
    let mut output = convert_document(text, Dialect::Wiki, context);
    output.push('\n');
    output
}

pub fn export_wiki(
    db: &TracDb,
    revisions: Option<&RevisionMap>,
    options: &WikiExportOptions,
) -> Result<WikiExportReport> {
    info!("Migrating Trac wiki entries to MediaWiki...");
    let pages = db.wiki_pages()?;

    // Every name has to be known before the first body is converted.
    let known: KnownPageNames = pages.iter().map(|page| page.name.clone()).collect();
    debug!("collected {} wiki page names", known.len());
    let context = ConversionContext::default()
        .with_known_pages(&known)
        .with_revisions(revisions);

    fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "failed to create wiki output directory {}",
            options.output_dir.display()
        )
    })?;

    let mut report = WikiExportReport {
        output_dir: normalize_for_display(&options.output_dir),
        ..WikiExportReport::default()
    };
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();

    for page in &pages {
        if page.name.trim().is_empty() {
            warn!("skipping wiki page with an empty name");
            report.pages_skipped += 1;
            continue;
        }
        let file_name = page_file_name(&page.name, options);
        if let Some(previous) = claimed.insert(file_name.clone(), page.name.clone()) {
            bail!(
                "wiki pages `{previous}` and `{}` both map to {file_name}",
                page.name
            );
        }

        info!("{}", page.name);
        let content = convert_wiki_page(&page.text, &context);
        let path = options.output_dir.join(&file_name);
        fs::write(&path, &content)
            .with_context(|| format!("failed to write {}", path.display()))?;

        report.pages.push(ExportedPage {
            name: page.name.clone(),
            file_name,
            bytes: content.len(),
        });
        report.pages_written += 1;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::trac::TimeUnit;
    use crate::trac::fixtures::{create_trac_db, insert_wiki};

    fn options_for(output_dir: &Path) -> WikiExportOptions {
        WikiExportOptions {
            output_dir: output_dir.to_path_buf(),
            ..WikiExportOptions::default()
        }
    }

    #[test]
    fn file_names_follow_page_names() {
        let options = WikiExportOptions::default();
        assert_eq!(page_file_name("WikiStart", &options), "Home.wiki");
        assert_eq!(page_file_name("BugTracker", &options), "BugTracker.wiki");
        assert_eq!(page_file_name("Guide/Install", &options), "Guide-Install.wiki");

        let bare = WikiExportOptions {
            extension: ".mw".to_string(),
            ..WikiExportOptions::default()
        };
        assert_eq!(page_file_name("BugTracker", &bare), "BugTracker.mw");
        let none = WikiExportOptions {
            extension: String::new(),
            ..WikiExportOptions::default()
        };
        assert_eq!(page_file_name("BugTracker", &none), "BugTracker");
    }

    #[test]
    fn export_writes_latest_pages_with_cross_links() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("trac.db");
        let connection = create_trac_db(&db_path);
        insert_wiki(&connection, "WikiStart", 1, "stale");
        insert_wiki(&connection, "WikiStart", 2, "Welcome. See BugTracker.");
        insert_wiki(&connection, "BugTracker", 1, "Back to WikiStart\n{{{\nWikiStart\n}}}");
        insert_wiki(&connection, "Guide/Install", 1, " * step one");
        drop(connection);

        let db = TracDb::open(&db_path, TimeUnit::Microseconds).expect("open");
        let output_dir = temp.path().join("out").join("wiki");
        let report = export_wiki(&db, None, &options_for(&output_dir)).expect("export");

        assert_eq!(report.pages_written, 3);
        let home = fs::read_to_string(output_dir.join("Home.wiki")).expect("home");
        assert_eq!(home, "Welcome. See [[BugTracker]].\n");
        let tracker = fs::read_to_string(output_dir.join("BugTracker.wiki")).expect("tracker");
        assert_eq!(tracker, "Back to [[WikiStart]]\n<pre>\nWikiStart\n</pre>\n");
        let guide = fs::read_to_string(output_dir.join("Guide-Install.wiki")).expect("guide");
        assert_eq!(guide, "* step one\n");
        assert!(
            report
                .pages
                .iter()
                .any(|page| page.name == "WikiStart" && page.file_name == "Home.wiki")
        );
    }

    #[test]
    fn export_rewrites_revisions_when_a_map_is_given() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("trac.db");
        let connection = create_trac_db(&db_path);
        insert_wiki(&connection, "ReleaseNotes", 1, "Landed in r7.");
        drop(connection);

        let db = TracDb::open(&db_path, TimeUnit::Microseconds).expect("open");
        let revisions = RevisionMap::from_iter([(7, "deadbeef".to_string())]);
        let output_dir = temp.path().join("wiki");
        export_wiki(&db, Some(&revisions), &options_for(&output_dir)).expect("export");

        let notes = fs::read_to_string(output_dir.join("ReleaseNotes.wiki")).expect("notes");
        assert_eq!(notes, "Landed in deadbeef.\n");
    }

    #[test]
    fn pages_without_a_name_are_skipped() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("trac.db");
        let connection = create_trac_db(&db_path);
        insert_wiki(&connection, "", 1, "orphaned text");
        insert_wiki(&connection, "BugTracker", 1, "tracker");
        drop(connection);

        let db = TracDb::open(&db_path, TimeUnit::Microseconds).expect("open");
        let output_dir = temp.path().join("wiki");
        let report = export_wiki(&db, None, &options_for(&output_dir)).expect("export");

        assert_eq!(report.pages_skipped, 1);
        assert_eq!(report.pages_written, 1);
        assert_eq!(report.pages.len(), 1);
        let mut written: Vec<String> = fs::read_dir(&output_dir)
            .expect("read output dir")
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        written.sort();
        assert_eq!(written, vec!["BugTracker.wiki".to_string()]);
    }

    #[test]
    fn colliding_file_names_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("trac.db");
        let connection = create_trac_db(&db_path);
        insert_wiki(&connection, "Guide-Install", 1, "a");
        insert_wiki(&connection, "Guide/Install", 1, "b");
        drop(connection);

        let db = TracDb::open(&db_path, TimeUnit::Microseconds).expect("open");
        let error = export_wiki(&db, None, &options_for(&temp.path().join("wiki")))
            .expect_err("must fail");
        assert!(error.to_string().contains("both map to Guide-Install.wiki"));
    }

    #[test]
    fn converted_page_ends_with_newline() {
        let context = ConversionContext::default();
        assert_eq!(convert_wiki_page("", &context), "\n");
        assert_eq!(convert_wiki_page("Term::\n def", &context), ";Term\n:def\n");
    }
}
