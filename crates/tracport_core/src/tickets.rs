use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::github::{
    CommentPayload, IssuePayload, IssueTrackerApi, LabelPayload, MilestonePayload, RecordState,
};
use crate::ticket_markup::TicketConverter;
use crate::trac::{Ticket, TracDb, TracMilestone};

pub const FILLER_TITLE: &str = "Filler ticket";
pub const FILLER_BODY: &str = "Empty ticket to maintain numbering with Trac";
const CLOSED_STATUS: &str = "closed";
const COMMENT_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketMigrationOptions {
    /// First ticket id to migrate.
    pub start: i64,
    /// Last ticket id to migrate, inclusive.
    pub end: Option<i64>,
    /// Only post comments (and close), assuming issue number == ticket id.
    pub comments_only: bool,
}

impl Default for TicketMigrationOptions {
    fn default() -> Self {
        Self {
            start: 1,
            end: None,
            comments_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TicketMapping {
    pub ticket: i64,
    pub issue: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TicketMigrationReport {
    pub tickets_migrated: usize,
    pub tickets_skipped: usize,
    pub fillers_created: usize,
    pub comments_posted: usize,
    pub issues_closed: usize,
    pub milestones_created: usize,
    pub labels_created: usize,
    pub request_count: usize,
    pub mappings: Vec<TicketMapping>,
}

/// Labels and milestones already known on the remote side, merged by exact name.
#[derive(Debug, Default)]
struct RemoteCatalog {
    labels: BTreeSet<String>,
    milestones: BTreeMap<String, u64>,
}

pub fn migrate_tickets<A: IssueTrackerApi>(
    db: &TracDb,
    api: &mut A,
    converter: &TicketConverter<'_>,
    options: &TicketMigrationOptions,
) -> Result<TicketMigrationReport> {
    let mut report = TicketMigrationReport::default();

    info!("Getting Trac ticket owners (will NOT be mapped to GitHub usernames)...");
    for owner in db.ticket_owners()? {
        debug!("Trac ticket owner: {owner}");
    }

    let mut catalog = load_remote_catalog(api)?;

    info!("Migrating Trac milestones to GitHub...");
    for milestone in db.milestones()? {
        migrate_milestone(api, &milestone, &mut catalog, &mut report)?;
    }

    info!("Migrating Trac tickets to GitHub...");
    for ticket in db.tickets()? {
        if ticket.id < options.start {
            report.tickets_skipped += 1;
            continue;
        }
        if options.end.is_some_and(|end| ticket.id > end) {
            break;
        }
        info!(
            "Ticket {}: [{}] {}",
            ticket.id,
            ticket.owner.trim(),
            ticket.summary
        );

        let number = if options.comments_only {
            issue_number_for(&ticket)?
        } else {
            let number = place_ticket(api, converter, &ticket, &mut catalog, &mut report)?;
            info!("Ticket mapping: trac={}, gh={number}", ticket.id);
            number
        };

        post_comments(db, api, converter, &ticket, number, &mut report)?;

        if ticket.status.trim() == CLOSED_STATUS {
            api.update_issue(number, &IssuePayload::close())
                .with_context(|| format!("failed to close issue {number}"))?;
            report.issues_closed += 1;
            debug!("closed issue {number}");
        }

        report.mappings.push(TicketMapping {
            ticket: ticket.id,
            issue: number,
        });
        report.tickets_migrated += 1;
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn load_remote_catalog<A: IssueTrackerApi>(api: &mut A) -> Result<RemoteCatalog> {
    let mut catalog = RemoteCatalog::default();

    info!("Getting existing GitHub labels...");
    for label in api.list_labels().context("failed to list GitHub labels")? {
        debug!("label name={}", label.name);
        catalog.labels.insert(label.name);
    }

    info!("Getting existing GitHub milestones...");
    for state in [RecordState::Open, RecordState::Closed] {
        let milestones = api
            .list_milestones(state)
            .with_context(|| format!("failed to list {} GitHub milestones", state.as_str()))?;
        for milestone in milestones {
            debug!("milestone ({}) title={}", state.as_str(), milestone.title);
            catalog.milestones.insert(milestone.title, milestone.number);
        }
    }

    Ok(catalog)
}

fn migrate_milestone<A: IssueTrackerApi>(
    api: &mut A,
    milestone: &TracMilestone,
    catalog: &mut RemoteCatalog,
    report: &mut TicketMigrationReport,
) -> Result<()> {
    let name = milestone.name.trim();
    debug!(
        "milestone name={name} due={:?} completed={:?}",
        milestone.due, milestone.completed
    );
    if name.is_empty() || catalog.milestones.contains_key(name) {
        return Ok(());
    }

    let payload = MilestonePayload {
        title: name.to_string(),
        state: if milestone.completed.is_some() {
            RecordState::Closed
        } else {
            RecordState::Open
        },
        description: Some(milestone.description.clone()),
        due_on: milestone.due.and_then(format_due_on),
    };
    let created = api
        .create_milestone(&payload)
        .with_context(|| format!("failed to create milestone {name}"))?;
    catalog.milestones.insert(name.to_string(), created.number);
    report.milestones_created += 1;
    Ok(())
}

/// Creates the issue for `ticket` so that its number equals the ticket id.
/// The summary-only create reveals the next number; a remote that is behind
/// gets filler issues, a remote that is ahead cannot be repaired.
fn place_ticket<A: IssueTrackerApi>(
    api: &mut A,
    converter: &TicketConverter<'_>,
    ticket: &Ticket,
    catalog: &mut RemoteCatalog,
    report: &mut TicketMigrationReport,
) -> Result<u64> {
    let expected = issue_number_for(ticket)?;
    let created = api
        .create_issue(&IssuePayload::titled(ticket.summary.clone()))
        .with_context(|| format!("failed to create issue for ticket {}", ticket.id))?;

    match created.number.cmp(&expected) {
        Ordering::Equal => {
            let record = full_record(api, converter, ticket, catalog, report)?;
            api.update_issue(expected, &record)
                .with_context(|| format!("failed to fill in issue {expected}"))?;
            Ok(expected)
        }
        Ordering::Less => {
            warn!(
                "GitHub numbering is behind Trac (issue {} for ticket {}); inserting fillers",
                created.number, ticket.id
            );
            replace_with_filler(api, created.number)?;
            report.fillers_created += 1;

            let mut current = created.number;
            while current + 1 < expected {
                let next = add_filler(api)?;
                if next <= current {
                    bail!(
                        "GitHub returned issue {next} after issue {current}; numbering is not sequential"
                    );
                }
                current = next;
                report.fillers_created += 1;
            }

            let record = full_record(api, converter, ticket, catalog, report)?;
            let recreated = api
                .create_issue(&record)
                .with_context(|| format!("failed to re-create issue for ticket {}", ticket.id))?;
            if recreated.number != expected {
                bail!(
                    "ticket {} landed on issue {} after filling the numbering gap",
                    ticket.id,
                    recreated.number
                );
            }
            Ok(expected)
        }
        Ordering::Greater => {
            bail!(
                "GitHub issue numbering is ahead of Trac numbering (issue {} for ticket {}) and cannot be used",
                created.number,
                ticket.id
            )
        }
    }
}

fn full_record<A: IssueTrackerApi>(
    api: &mut A,
    converter: &TicketConverter<'_>,
    ticket: &Ticket,
    catalog: &mut RemoteCatalog,
    report: &mut TicketMigrationReport,
) -> Result<IssuePayload> {
    let body = converter.description(ticket);
    let milestone = match ticket.milestone.trim() {
        "" => None,
        name => catalog.milestones.get(name).copied(),
    };
    let component = ticket.component.trim();
    let labels = if component.is_empty() {
        None
    } else {
        if !catalog.labels.contains(component) {
            api.create_label(&LabelPayload {
                name: component.to_string(),
            })
            .with_context(|| format!("failed to create label {component}"))?;
            catalog.labels.insert(component.to_string());
            report.labels_created += 1;
            debug!("adding component as new label={component}");
        }
        Some(vec![component.to_string()])
    };

    Ok(IssuePayload {
        title: Some(ticket.summary.clone()),
        body: (!body.is_empty()).then_some(body),
        milestone,
        labels,
        state: None,
    })
}

fn filler_record() -> IssuePayload {
    IssuePayload {
        title: Some(FILLER_TITLE.to_string()),
        body: Some(FILLER_BODY.to_string()),
        ..IssuePayload::default()
    }
}

fn replace_with_filler<A: IssueTrackerApi>(api: &mut A, number: u64) -> Result<()> {
    let record = IssuePayload {
        state: Some(RecordState::Closed),
        ..filler_record()
    };
    api.update_issue(number, &record)
        .with_context(|| format!("failed to turn issue {number} into a filler"))?;
    info!("Replaced existing issue {number} with filler data to maintain numbering with Trac");
    Ok(())
}

fn add_filler<A: IssueTrackerApi>(api: &mut A) -> Result<u64> {
    let created = api
        .create_issue(&filler_record())
        .context("failed to create filler issue")?;
    api.update_issue(created.number, &IssuePayload::close())
        .with_context(|| format!("failed to close filler issue {}", created.number))?;
    info!(
        "Added filler issue {} to maintain numbering with Trac",
        created.number
    );
    Ok(created.number)
}

fn post_comments<A: IssueTrackerApi>(
    db: &TracDb,
    api: &mut A,
    converter: &TicketConverter<'_>,
    ticket: &Ticket,
    number: u64,
    report: &mut TicketMigrationReport,
) -> Result<()> {
    for comment in db.ticket_comments(ticket.id)? {
        let Some(body) = converter.comment(&comment) else {
            continue;
        };
        if body.is_empty() {
            continue;
        }
        debug!("issue comment: {}", comment_preview(&body));
        api.create_comment(number, &CommentPayload { body })
            .with_context(|| format!("failed to add comment to issue {number}"))?;
        report.comments_posted += 1;
    }
    Ok(())
}

fn issue_number_for(ticket: &Ticket) -> Result<u64> {
    u64::try_from(ticket.id)
        .with_context(|| format!("ticket id {} cannot be used as an issue number", ticket.id))
}

fn format_due_on(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|moment| moment.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn comment_preview(body: &str) -> String {
    body.chars()
        .take(COMMENT_PREVIEW_CHARS)
        .collect::<String>()
        .replace('\n', "\\n")
}
