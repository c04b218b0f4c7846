use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Row, params};
use serde::{Deserialize, Serialize};

/// Unit of the integer timestamps stored in the Trac database. Trac 0.12 and
/// later store microseconds; older installs store seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    #[default]
    Microseconds,
}

impl TimeUnit {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "seconds" => Ok(Self::Seconds),
            "us" | "usec" | "microseconds" => Ok(Self::Microseconds),
            other => bail!("unsupported time unit: {other} (expected seconds|microseconds)"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Microseconds => "microseconds",
        }
    }

    pub fn to_seconds(self, value: i64) -> i64 {
        match self {
            Self::Seconds => value,
            Self::Microseconds => value.div_euclid(1_000_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: i64,
    pub summary: String,
    pub description: String,
    pub owner: String,
    pub reporter: String,
    pub milestone: String,
    pub component: String,
    pub status: String,
    /// Epoch seconds as text, or the raw stored value when it is not an integer.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketComment {
    pub author: String,
    pub time: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracMilestone {
    pub name: String,
    pub description: String,
    pub due: Option<i64>,
    pub completed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub name: String,
    pub text: String,
    pub version: i64,
}

/// Read-only view of a Trac SQLite database.
pub struct TracDb {
    connection: Connection,
    path: PathBuf,
    time_unit: TimeUnit,
}

impl TracDb {
    pub fn open(path: &Path, time_unit: TimeUnit) -> Result<Self> {
        if !path.is_file() {
            bail!("Trac database not found: {}", path.display());
        }
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("could not open Trac database {}", path.display()))?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
            time_unit,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn tickets(&self) -> Result<Vec<Ticket>> {
        self.require_table("ticket")?;
        let mut statement = self
            .connection
            .prepare(
                "SELECT id, summary, description, owner, reporter, milestone, component, status, time
                 FROM ticket ORDER BY id",
            )
            .context("failed to prepare ticket query")?;
        let rows = statement
            .query_map([], |row| {
                Ok(Ticket {
                    id: row.get(0)?,
                    summary: text_column(row, 1)?,
                    description: text_column(row, 2)?,
                    owner: text_column(row, 3)?,
                    reporter: text_column(row, 4)?,
                    milestone: text_column(row, 5)?,
                    component: text_column(row, 6)?,
                    status: text_column(row, 7)?,
                    time: epoch_text(row.get(8)?, self.time_unit),
                })
            })
            .context("failed to query tickets")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode ticket row")
    }

    pub fn ticket_comments(&self, ticket_id: i64) -> Result<Vec<TicketComment>> {
        self.require_table("ticket_change")?;
        let mut statement = self
            .connection
            .prepare(
                "SELECT author, time, newvalue FROM ticket_change
                 WHERE field = 'comment' AND ticket = ?1
                 ORDER BY time",
            )
            .context("failed to prepare ticket comment query")?;
        let rows = statement
            .query_map(params![ticket_id], |row| {
                Ok(TicketComment {
                    author: text_column(row, 0)?,
                    time: epoch_text(row.get(1)?, self.time_unit),
                    body: text_column(row, 2)?,
                })
            })
            .with_context(|| format!("failed to query comments for ticket {ticket_id}"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to decode comment row for ticket {ticket_id}"))
    }

    pub fn milestones(&self) -> Result<Vec<TracMilestone>> {
        self.require_table("milestone")?;
        let mut statement = self
            .connection
            .prepare("SELECT name, description, due, completed FROM milestone ORDER BY name")
            .context("failed to prepare milestone query")?;
        let rows = statement
            .query_map([], |row| {
                Ok(TracMilestone {
                    name: text_column(row, 0)?,
                    description: text_column(row, 1)?,
                    due: epoch_seconds(row.get(2)?, self.time_unit),
                    completed: epoch_seconds(row.get(3)?, self.time_unit),
                })
            })
            .context("failed to query milestones")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode milestone row")
    }

    pub fn ticket_owners(&self) -> Result<Vec<String>> {
        self.require_table("ticket")?;
        let mut statement = self
            .connection
            .prepare("SELECT DISTINCT owner FROM ticket ORDER BY owner")
            .context("failed to prepare ticket owner query")?;
        let rows = statement
            .query_map([], |row| text_column(row, 0))
            .context("failed to query ticket owners")?;
        let mut owners = Vec::new();
        for owner in rows {
            let owner = owner.context("failed to decode ticket owner")?;
            let owner = owner.trim();
            if !owner.is_empty() {
                owners.push(owner.to_string());
            }
        }
        Ok(owners)
    }

    /// Latest version of every wiki page, ordered by name.
    pub fn wiki_pages(&self) -> Result<Vec<WikiPage>> {
        self.require_table("wiki")?;
        let mut statement = self
            .connection
            .prepare(
                "SELECT w.name, w.text, w.version
                 FROM wiki w
                 JOIN (SELECT name, MAX(version) AS version FROM wiki GROUP BY name) latest
                   ON latest.name = w.name AND latest.version = w.version
                 ORDER BY w.name",
            )
            .context("failed to prepare wiki query")?;
        let rows = statement
            .query_map([], |row| {
                Ok(WikiPage {
                    name: text_column(row, 0)?,
                    text: text_column(row, 1)?,
                    version: row.get(2)?,
                })
            })
            .context("failed to query wiki pages")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode wiki row")
    }

    fn require_table(&self, table_name: &str) -> Result<()> {
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table_name],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to inspect sqlite_master for table {table_name}"))?;
        if exists != 1 {
            bail!(
                "{} does not look like a Trac database (missing table `{table_name}`)",
                self.path.display()
            );
        }
        Ok(())
    }
}

fn text_column(row: &Row<'_>, index: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(index)?.unwrap_or_default())
}

fn epoch_text(value: Value, unit: TimeUnit) -> String {
    match value {
        Value::Integer(number) => unit.to_seconds(number).to_string(),
        Value::Real(number) => unit.to_seconds(number as i64).to_string(),
        Value::Text(text) => match text.trim().parse::<i64>() {
            Ok(number) => unit.to_seconds(number).to_string(),
            Err(_) => text,
        },
        Value::Null | Value::Blob(_) => String::new(),
    }
}

/// Zero and NULL both mean "not set" in the milestone table.
fn epoch_seconds(value: Value, unit: TimeUnit) -> Option<i64> {
    let number = match value {
        Value::Integer(number) => number,
        Value::Real(number) => number as i64,
        Value::Text(text) => text.trim().parse::<i64>().ok()?,
        Value::Null | Value::Blob(_) => return None,
    };
    if number == 0 {
        return None;
    }
    Some(unit.to_seconds(number))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use rusqlite::{Connection, params};

    const TRAC_SCHEMA_SQL: &str = r#"
CREATE TABLE ticket (
    id INTEGER PRIMARY KEY,
    type TEXT,
    time INTEGER,
    changetime INTEGER,
    component TEXT,
    severity TEXT,
    priority TEXT,
    owner TEXT,
    reporter TEXT,
    cc TEXT,
    version TEXT,
    milestone TEXT,
    status TEXT,
    resolution TEXT,
    summary TEXT,
    description TEXT,
    keywords TEXT
);
CREATE TABLE ticket_change (
    ticket INTEGER,
    time INTEGER,
    author TEXT,
    field TEXT,
    oldvalue TEXT,
    newvalue TEXT,
    UNIQUE (ticket, time, field)
);
CREATE TABLE milestone (
    name TEXT PRIMARY KEY,
    due INTEGER,
    completed INTEGER,
    description TEXT
);
CREATE TABLE wiki (
    name TEXT,
    version INTEGER,
    time INTEGER,
    author TEXT,
    ipnr TEXT,
    text TEXT,
    comment TEXT,
    readonly INTEGER,
    UNIQUE (name, version)
);
"#;

    pub struct TicketRow<'a> {
        pub id: i64,
        pub summary: &'a str,
        pub description: &'a str,
        pub reporter: &'a str,
        pub milestone: &'a str,
        pub component: &'a str,
        pub status: &'a str,
        pub time: i64,
    }

    pub fn create_trac_db(path: &Path) -> Connection {
        let connection = Connection::open(path).expect("create trac db");
        connection
            .execute_batch(TRAC_SCHEMA_SQL)
            .expect("create trac schema");
        connection
    }

    pub fn insert_ticket(connection: &Connection, ticket: &TicketRow<'_>) {
        connection
            .execute(
                "INSERT INTO ticket (id, time, component, owner, reporter, milestone, status, summary, description)
                 VALUES (?1, ?2, ?3, 'phred', ?4, ?5, ?6, ?7, ?8)",
                params![
                    ticket.id,
                    ticket.time,
                    ticket.component,
                    ticket.reporter,
                    ticket.milestone,
                    ticket.status,
                    ticket.summary,
                    ticket.description
                ],
            )
            .expect("insert ticket");
    }

    pub fn insert_comment(
        connection: &Connection,
        ticket: i64,
        time: i64,
        author: &str,
        body: &str,
    ) {
        connection
            .execute(
                "INSERT INTO ticket_change (ticket, time, author, field, oldvalue, newvalue)
                 VALUES (?1, ?2, ?3, 'comment', '', ?4)",
                params![ticket, time, author, body],
            )
            .expect("insert comment");
    }

    pub fn insert_milestone(
        connection: &Connection,
        name: &str,
        due: i64,
        completed: i64,
        description: &str,
    ) {
        connection
            .execute(
                "INSERT INTO milestone (name, due, completed, description) VALUES (?1, ?2, ?3, ?4)",
                params![name, due, completed, description],
            )
            .expect("insert milestone");
    }

    pub fn insert_wiki(connection: &Connection, name: &str, version: i64, text: &str) {
        connection
            .execute(
                "INSERT INTO wiki (name, version, time, author, text) VALUES (?1, ?2, 0, 'admin', ?3)",
                params![name, version, text],
            )
            .expect("insert wiki");
    }
}
