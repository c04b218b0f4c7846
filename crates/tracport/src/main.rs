use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::fmt;
use tracport_core::config::{TracportConfig, load_config};
use tracport_core::github::{GitHubClient, GitHubClientConfig};
use tracport_core::markup::{ConversionContext, Dialect, convert_document};
use tracport_core::revisions::{RevisionMap, revision_map_from_git_dir};
use tracport_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display as normalize_path, resolve_paths,
};
use tracport_core::ticket_markup::TicketConverter;
use tracport_core::tickets::{TicketMigrationOptions, TicketMigrationReport, migrate_tickets};
use tracport_core::trac::{TimeUnit, TracDb};
use tracport_core::wiki_export::{WikiExportReport, export_wiki};
use tracport_core::wiki_markup::KnownPageNames;

#[derive(Debug, Parser)]
#[command(
    name = "tracport",
    version,
    about = "Migrate Trac tickets to GitHub issues and the Trac wiki to MediaWiki markup"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Decrease logging of activity")]
    quiet: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create .tracport/ and a starter config.toml
    Init(InitArgs),
    /// Copy Trac tickets, comments and milestones to GitHub issues
    Tickets(TicketsArgs),
    /// Write every Trac wiki page as a MediaWiki file
    Wiki(WikiArgs),
    /// Print a converted Trac markup file (or stdin) without touching any remote
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
    #[arg(long, value_name = "PATH", help = "Record [trac] db_path in the config")]
    trac_db: Option<String>,
    #[arg(long, value_name = "OWNER/NAME", help = "Record [github] repo in the config")]
    repo: Option<String>,
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(
        short = 'r',
        long = "revision-map",
        value_name = "GIT_DIR",
        help = "Get svn to git revision map from a git-svn clone"
    )]
    revision_map: Option<PathBuf>,
    #[arg(long, value_name = "UNIT", help = "Trac timestamp unit: seconds|microseconds")]
    time_unit: Option<String>,
}

#[derive(Debug, Args)]
struct TicketsArgs {
    #[arg(value_name = "TRAC_DB")]
    trac_db: Option<PathBuf>,
    #[arg(long, value_name = "OWNER/NAME")]
    repo: Option<String>,
    #[command(flatten)]
    source: SourceArgs,
    #[arg(
        short = 's',
        long = "ticket-start",
        value_name = "N",
        default_value_t = 1,
        help = "Starting ticket number"
    )]
    ticket_start: i64,
    #[arg(
        short = 'e',
        long = "ticket-end",
        value_name = "N",
        help = "Ending ticket number, inclusive (default: all remaining tickets)"
    )]
    ticket_end: Option<i64>,
    #[arg(
        short = 'c',
        long = "comments-only",
        help = "Add comments to existing issues; don't create any new issues"
    )]
    comments_only: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct WikiArgs {
    #[arg(value_name = "TRAC_DB")]
    trac_db: Option<PathBuf>,
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, value_name = "EXT", help = "File extension for written pages")]
    extension: Option<String>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[arg(value_name = "FILE", help = "Trac markup file, or - for stdin")]
    input: String,
    #[arg(long, default_value = "ticket", help = "ticket (GitHub markdown) or wiki (MediaWiki)")]
    dialect: String,
    #[arg(
        short = 'r',
        long = "revision-map",
        value_name = "GIT_DIR",
        help = "Get svn to git revision map from a git-svn clone"
    )]
    revision_map: Option<PathBuf>,
    #[arg(long = "known-page", value_name = "NAME", help = "Page name to link (repeatable)")]
    known_pages: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Tickets(args)) => run_tickets(&runtime, args),
        Some(Commands::Wiki(args)) => run_wiki(&runtime, args),
        Some(Commands::Convert(args)) => run_convert(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(quiet: bool) {
    let level = if quiet { Level::INFO } else { Level::DEBUG };
    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            force: args.force,
            trac_db: args.trac_db,
            repo: args.repo,
        },
    )?;

    println!("Initialized tracport runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("patched_config: {}", report.patched_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_tickets(runtime: &RuntimeOptions, args: TicketsArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let db_path = resolve_trac_db(args.trac_db.as_deref(), &config, &paths)?;
    let time_unit = resolve_time_unit(args.source.time_unit.as_deref(), &config)?;
    let options = TicketMigrationOptions {
        start: args.ticket_start,
        end: args.ticket_end,
        comments_only: args.comments_only,
    };
    if let Some(end) = options.end
        && end < options.start
    {
        bail!("--ticket-end {end} is before --ticket-start {}", options.start);
    }

    let revisions = load_revision_map(args.source.revision_map.as_deref(), &config, &paths)?;
    let db = TracDb::open(&db_path, time_unit)?;
    let client_config = GitHubClientConfig::from_config(&config).with_repo(args.repo.as_deref());
    let mut client = GitHubClient::new(client_config)?;
    info!("migrating {} into {}", normalize_path(db.path()), client.repo());

    let converter = TicketConverter::new(revisions.as_ref());
    let report = migrate_tickets(&db, &mut client, &converter, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("ticket migration");
        println!("trac_db: {}", normalize_path(db.path()));
        println!("repo: {}", client.repo());
        println!("time_unit: {}", db.time_unit().as_str());
        println!("revision_map: {}", describe_revisions(revisions.as_ref()));
        print_ticket_report(&report);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_wiki(runtime: &RuntimeOptions, args: WikiArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let db_path = resolve_trac_db(args.trac_db.as_deref(), &config, &paths)?;
    let time_unit = resolve_time_unit(args.source.time_unit.as_deref(), &config)?;

    let mut options = config.wiki_export_options(&paths.project_root);
    if let Some(output_dir) = args.output_dir {
        options.output_dir = output_dir;
    }
    if let Some(extension) = args.extension {
        options.extension = extension;
    }

    let revisions = load_revision_map(args.source.revision_map.as_deref(), &config, &paths)?;
    let db = TracDb::open(&db_path, time_unit)?;
    let report = export_wiki(&db, revisions.as_ref(), &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("wiki export");
        println!("trac_db: {}", normalize_path(db.path()));
        println!("time_unit: {}", db.time_unit().as_str());
        println!("revision_map: {}", describe_revisions(revisions.as_ref()));
        print_wiki_report(&report);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_convert(runtime: &RuntimeOptions, args: ConvertArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let dialect = Dialect::parse(&args.dialect)?;
    let text = read_input(&args.input)?;
    info!("converting {} as {} markup", args.input, dialect.as_str());

    let revisions = load_revision_map(args.revision_map.as_deref(), &config, &paths)?;
    let known_pages: KnownPageNames = args.known_pages.into_iter().collect();
    let context = ConversionContext::default()
        .with_revisions(revisions.as_ref())
        .with_known_pages(&known_pages);

    println!("{}", convert_document(&text, dialect, &context));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn resolve_trac_db(
    flag: Option<&Path>,
    config: &TracportConfig,
    paths: &ResolvedPaths,
) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    match config.trac_db_path(&paths.project_root) {
        Some(path) => Ok(path),
        None => bail!(
            "no Trac database given; pass TRAC_DB or set [trac] db_path in {}",
            normalize_path(&paths.config_path)
        ),
    }
}

fn resolve_time_unit(flag: Option<&str>, config: &TracportConfig) -> Result<TimeUnit> {
    match flag {
        Some(value) => TimeUnit::parse(value),
        None => Ok(config.time_unit()),
    }
}

fn load_revision_map(
    flag: Option<&Path>,
    config: &TracportConfig,
    paths: &ResolvedPaths,
) -> Result<Option<RevisionMap>> {
    let git_dir = match flag {
        Some(path) => Some(path.to_path_buf()),
        None => config.revisions_git_dir(&paths.project_root),
    };
    let Some(git_dir) = git_dir else {
        return Ok(None);
    };
    let revisions = revision_map_from_git_dir(&git_dir)?;
    info!(
        "loaded {} svn revision mappings from {}",
        revisions.len(),
        normalize_path(&git_dir)
    );
    Ok(Some(revisions))
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
}

fn print_ticket_report(report: &TicketMigrationReport) {
    println!("tickets_migrated: {}", report.tickets_migrated);
    println!("tickets_skipped: {}", report.tickets_skipped);
    println!("fillers_created: {}", report.fillers_created);
    println!("comments_posted: {}", report.comments_posted);
    println!("issues_closed: {}", report.issues_closed);
    println!("milestones_created: {}", report.milestones_created);
    println!("labels_created: {}", report.labels_created);
    println!("request_count: {}", report.request_count);
    if let (Some(first), Some(last)) = (report.mappings.first(), report.mappings.last()) {
        println!(
            "mapped: trac {}..{} -> gh {}..{}",
            first.ticket, last.ticket, first.issue, last.issue
        );
    }
}

fn print_wiki_report(report: &WikiExportReport) {
    println!("output_dir: {}", report.output_dir);
    println!("pages_written: {}", report.pages_written);
    println!("pages_skipped: {}", report.pages_skipped);
    for page in &report.pages {
        println!("  {} -> {} ({} bytes)", page.name, page.file_name, page.bytes);
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn describe_revisions(revisions: Option<&RevisionMap>) -> String {
    match revisions {
        Some(map) => format!("{} entries", map.len()),
        None => "<none>".to_string(),
    }
}
