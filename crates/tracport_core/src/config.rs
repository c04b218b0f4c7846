use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::trac::TimeUnit;
use crate::wiki_export::{
    DEFAULT_EXTENSION, DEFAULT_HOME_PAGE, DEFAULT_OUTPUT_DIR, DEFAULT_START_PAGE,
    WikiExportOptions,
};

pub const DEFAULT_USER_AGENT: &str = "tracport/0.2";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TracportConfig {
    #[serde(default)]
    pub trac: TracSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub revisions: RevisionsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TracSection {
    pub db_path: Option<String>,
    pub time_unit: Option<TimeUnit>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GitHubSection {
    pub api_url: Option<String>,
    pub repo: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub output_dir: Option<String>,
    pub extension: Option<String>,
    pub start_page: Option<String>,
    pub home_page: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RevisionsSection {
    /// git-svn clone used to map `rN` references to commit ids.
    pub git_dir: Option<String>,
}

impl TracportConfig {
    /// Resolve user agent: env TRACPORT_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("TRACPORT_USER_AGENT")
            .or_else(|| self.github.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.trac.time_unit.unwrap_or_default()
    }

    pub fn trac_db_path(&self, project_root: &Path) -> Option<PathBuf> {
        self.trac
            .db_path
            .as_deref()
            .map(|path| resolve_from(project_root, path))
    }

    pub fn revisions_git_dir(&self, project_root: &Path) -> Option<PathBuf> {
        self.revisions
            .git_dir
            .as_deref()
            .map(|path| resolve_from(project_root, path))
    }

    /// Wiki export settings with relative paths anchored at the project root.
    pub fn wiki_export_options(&self, project_root: &Path) -> WikiExportOptions {
        let section = &self.wiki;
        WikiExportOptions {
            output_dir: resolve_from(
                project_root,
                section.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR),
            ),
            extension: section
                .extension
                .clone()
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            start_page: section
                .start_page
                .clone()
                .unwrap_or_else(|| DEFAULT_START_PAGE.to_string()),
            home_page: section
                .home_page
                .clone()
                .unwrap_or_else(|| DEFAULT_HOME_PAGE.to_string()),
        }
    }
}

/// Load and parse a TracportConfig from a TOML file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<TracportConfig> {
    if !config_path.exists() {
        return Ok(TracportConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: TracportConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Commented starter config written by `tracport init`.
pub fn render_default_config() -> String {
    format!(
        r#"# tracport configuration. Relative paths resolve against the project root.

[trac]
# db_path = "trac.db"
# Trac 0.12 and later store microseconds; older installs store seconds.
time_unit = "microseconds"

[github]
# repo = "owner/name"
# api_url = "https://api.github.com"
# user_agent = "{DEFAULT_USER_AGENT}"
# The token is read from GITHUB_TOKEN and is never stored here.

[wiki]
output_dir = "{DEFAULT_OUTPUT_DIR}"
extension = "{DEFAULT_EXTENSION}"
start_page = "{DEFAULT_START_PAGE}"
home_page = "{DEFAULT_HOME_PAGE}"

[revisions]
# git_dir = "../project-git"
"#
    )
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub set_db_path: Option<String>,
    pub set_repo: Option<String>,
}

/// Update `[trac] db_path` and `[github] repo` while preserving all other keys.
/// Returns `true` when a write occurred.
pub fn patch_config(config_path: &Path, patch: &ConfigPatch) -> Result<bool> {
    if patch.set_db_path.is_none() && patch.set_repo.is_none() {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;

    if let Some(db_path) = &patch.set_db_path {
        if db_path.trim().is_empty() {
            bail!("trac db_path cannot be empty");
        }
        section_table(root_table, "trac", config_path)?
            .insert("db_path".to_string(), Value::String(db_path.clone()));
    }
    if let Some(repo) = &patch.set_repo {
        crate::github::validate_repo_slug(repo)?;
        section_table(root_table, "github", config_path)?
            .insert("repo".to_string(), Value::String(repo.clone()));
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn section_table<'a>(
    root: &'a mut toml::map::Map<String, Value>,
    name: &str,
    config_path: &Path,
) -> Result<&'a mut toml::map::Map<String, Value>> {
    root.entry(name.to_string())
        .or_insert_with(|| Value::Table(Default::default()))
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[{name}] must be a table in {}", config_path.display()))
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_from(project_root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}
