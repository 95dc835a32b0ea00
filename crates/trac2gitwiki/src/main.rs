use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use trac2gitwiki_core::authors::AuthorMap;
use trac2gitwiki_core::git::GitWorkTree;
use trac2gitwiki_core::migrate::{Migration, MigrationReport};
use trac2gitwiki_core::runtime::{
    ResolutionContext, ResolvedSettings, RunMode, SettingOverrides, resolve_settings,
};
use trac2gitwiki_core::store::{RevisionSource, TracExport};

#[derive(Debug, Parser)]
#[command(
    name = "trac2gitwiki",
    version,
    about = "Migrate a Trac wiki export into a git-backed Markdown wiki"
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Trac sqlite3 database export")]
    trac_export: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Root of the destination git work tree")]
    git_root: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Headerless trac_author,email CSV file")]
    author_map: Option<PathBuf>,
    #[arg(long, value_name = "URL", help = "Base URL of the source Trac instance")]
    trac_base: Option<String>,
    #[arg(long, value_name = "TEXT", help = "Commit message for revisions without a comment")]
    default_comment: Option<String>,
    #[arg(long, value_name = "HOST", help = "E-mail host for unmapped authors")]
    default_email_host: Option<String>,
    #[arg(long, value_name = "PATH", help = "TOML config file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Print distinct Trac authors and exit")]
    extract_trac_authors: bool,
    #[arg(
        long,
        conflicts_with = "extract_trac_authors",
        help = "Print raw attachment URLs and exit"
    )]
    extract_trac_attachments: bool,
    #[arg(long, help = "Replay the history of Trac's own pages too")]
    keep_admin_history: bool,
    #[arg(long, help = "Print results as JSON")]
    json: bool,
    #[arg(long, help = "Print resolved settings before running")]
    diagnostics: bool,
    #[arg(long, conflicts_with = "quiet", help = "Log debug details")]
    debug: bool,
    #[arg(long, help = "Log errors only")]
    quiet: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.extract_trac_authors {
            RunMode::ExtractAuthors
        } else if self.extract_trac_attachments {
            RunMode::ExtractAttachments
        } else {
            RunMode::Migrate
        }
    }

    fn overrides(&self) -> SettingOverrides {
        SettingOverrides {
            trac_export: self.trac_export.clone(),
            git_root: self.git_root.clone(),
            author_map: self.author_map.clone(),
            trac_base: self.trac_base.clone(),
            default_comment: self.default_comment.clone(),
            default_email_host: self.default_email_host.clone(),
            config: self.config.clone(),
            keep_admin_history: self.keep_admin_history,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(&cli);

    let context = ResolutionContext::from_process()?;
    let settings = resolve_settings(&context, &cli.overrides())?;
    if cli.diagnostics {
        println!("[diagnostics]\n{}\n", settings.diagnostics());
    }

    let mode = cli.mode();
    settings.verify(mode)?;

    match mode {
        RunMode::ExtractAuthors => run_extract_authors(&settings, cli.json),
        RunMode::ExtractAttachments => run_extract_attachments(&settings, cli.json),
        RunMode::Migrate => run_migrate(&settings, cli.json),
    }
}

fn init_logging(cli: &Cli) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_export(settings: &ResolvedSettings) -> Result<TracExport> {
    let path = settings
        .trac_export
        .as_ref()
        .map(|setting| setting.value.as_path())
        .context("no trac export specified")?;
    TracExport::open(path)
}

fn run_extract_authors(settings: &ResolvedSettings, json: bool) -> Result<()> {
    info!("extracting trac authors");
    let authors = open_export(settings)?.authors()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&authors)?);
    } else {
        for author in &authors {
            println!("{author}");
        }
    }
    Ok(())
}

fn run_extract_attachments(settings: &ResolvedSettings, json: bool) -> Result<()> {
    info!("extracting trac attachment urls");
    let base = settings
        .trac_base
        .as_ref()
        .map(|setting| setting.value.as_str())
        .context("no trac base URL specified")?;
    let urls: Vec<String> = open_export(settings)?
        .attachments()?
        .iter()
        .map(|attachment| attachment.raw_url(base))
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&urls)?);
    } else {
        for url in &urls {
            println!("{url}");
        }
    }
    Ok(())
}

fn run_migrate(settings: &ResolvedSettings, json: bool) -> Result<()> {
    let export = open_export(settings)?;
    let email_host = settings.default_email_host.value.clone();
    let authors = match &settings.author_map {
        Some(setting) => {
            info!(path = %setting.value.display(), "loading author map");
            AuthorMap::load_csv(&setting.value, email_host)?
        }
        None => {
            info!("no author map given; generating one from trac authors");
            AuthorMap::generated(export.authors()?, email_host)
        }
    };
    debug!(authors = authors.len(), "author map ready");

    let options = settings.migration_options()?;
    let mut sink = GitWorkTree::new(options.destination.clone());
    let report = Migration::new(&export, &mut sink, &authors, options).run()?;
    print_report(&report, json)
}

fn print_report(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("migration {}", report.phase.as_str());
    println!("pages: {}", report.pages);
    println!("directory_names: {}", report.directory_names);
    println!("revisions_replayed: {}", report.revisions_replayed);
    println!("revisions_skipped: {}", report.revisions_skipped);
    println!("pages_renamed: {}", report.pages_renamed);
    println!("pages_converted: {}", report.pages_converted);
    println!("commits: {}", report.commits);
    Ok(())
}
