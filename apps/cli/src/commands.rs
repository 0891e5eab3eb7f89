//! CLI command definitions, routing, and tracing setup.

use std::io::Write;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use docrag_core::DocRag;
use docrag_shared::{ChatEvent, CrawlEvent, SiteId, init_config, load_config};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// DocRAG — crawl documentation, search it, ask it questions.
#[derive(Parser)]
#[command(
    name = "docrag",
    version,
    about = "Crawl documentation sites into a local hybrid index and chat over it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl and index a documentation site.
    Add {
        /// Root URL of the documentation site.
        url: String,

        /// Human-readable name (defaults to the URL hostname).
        #[arg(short, long)]
        name: Option<String>,

        /// Return immediately instead of watching the crawl to completion.
        #[arg(long)]
        no_watch: bool,
    },

    /// List all indexed sites.
    List,

    /// Show the status of one site.
    Status {
        /// Site id (from `docrag list`).
        site_id: String,
    },

    /// Delete a site and everything indexed from it.
    Delete {
        /// Site id (from `docrag list`).
        site_id: String,
    },

    /// Delete every site and the whole index.
    Clear {
        /// Confirm the purge.
        #[arg(long)]
        force: bool,
    },

    /// Ask a question over the indexed documentation.
    Ask {
        /// The question.
        question: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docrag=info",
        1 => "docrag=debug",
        _ => "docrag=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Add { url, name, no_watch } => cmd_add(&url, name, no_watch).await,
        Command::List => cmd_list().await,
        Command::Status { site_id } => cmd_status(&site_id).await,
        Command::Delete { site_id } => cmd_delete(&site_id).await,
        Command::Clear { force } => cmd_clear(force).await,
        Command::Ask { question } => cmd_ask(&question.join(" ")).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

async fn open_service() -> Result<DocRag> {
    let config = load_config()?;
    Ok(DocRag::open(config).await?)
}

fn parse_site_id(raw: &str) -> Result<SiteId> {
    raw.parse::<SiteId>()
        .map_err(|e| eyre!("invalid site id '{raw}': {e}"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_add(url: &str, name: Option<String>, no_watch: bool) -> Result<()> {
    let service = open_service().await?;
    let site = service.submit_site(url, name).await?;

    info!(site_id = %site.id, url = %site.url, "site submitted");
    println!("  Added {} ({})", site.name, site.url);
    println!("  ID: {}", site.id);

    if no_watch {
        println!("  Crawling in the background; check with `docrag status {}`", site.id);
        return Ok(());
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("  {bar:30.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let done = service
        .watch_site(site.id, |event| {
            if let CrawlEvent::CrawlProgress {
                progress,
                current_url,
                chunks_added,
                ..
            } = event
            {
                bar.set_position(*progress as u64);
                if let Some(url) = current_url {
                    bar.set_message(format!("{chunks_added} chunks · {url}"));
                }
            }
        })
        .await?;
    bar.finish_and_clear();

    match done.error {
        None => {
            println!(
                "  Done: {} chunks indexed from {}",
                done.total_chunks.unwrap_or(done.chunks_added),
                done.url
            );
        }
        Some(error) => {
            println!("  Crawl failed: {error}");
        }
    }
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let service = open_service().await?;
    let sites = service.list_sites().await?;

    if sites.is_empty() {
        println!("  No sites indexed yet. Add one with `docrag add <url>`.");
        return Ok(());
    }

    println!("  {:<38} {:<12} {:>6} {:>8}  NAME / URL", "ID", "STATUS", "PROG", "CHUNKS");
    for site in sites {
        println!(
            "  {:<38} {:<12} {:>5.0}% {:>8}  {} — {}",
            site.id,
            site.status.as_str(),
            site.progress,
            site.chunks_added,
            site.name,
            site.url
        );
    }
    Ok(())
}

async fn cmd_status(raw_id: &str) -> Result<()> {
    let service = open_service().await?;
    let site = service.site_status(parse_site_id(raw_id)?).await?;

    println!("  Name:     {}", site.name);
    println!("  URL:      {}", site.url);
    println!("  Status:   {}", site.status.as_str());
    println!("  Progress: {:.0}%", site.progress);
    println!("  Chunks:   {}", site.chunks_added);
    if let Some(total) = site.total_chunks {
        println!("  Total:    {total}");
    }
    if let Some(current) = &site.current_url {
        println!("  Fetching: {current}");
    }
    if let Some(error) = &site.error {
        println!("  Error:    {error}");
    }
    Ok(())
}

async fn cmd_delete(raw_id: &str) -> Result<()> {
    let service = open_service().await?;
    let site = service.delete_site(parse_site_id(raw_id)?).await?;
    println!("  Deleted {} ({})", site.name, site.url);
    Ok(())
}

async fn cmd_clear(force: bool) -> Result<()> {
    if !force {
        return Err(eyre!(
            "this deletes every site and the whole index; re-run with --force to confirm"
        ));
    }
    let service = open_service().await?;
    service.clear_database().await?;
    println!("  Database cleared.");
    Ok(())
}

async fn cmd_ask(question: &str) -> Result<()> {
    if question.trim().is_empty() {
        return Err(eyre!("usage: docrag ask <question>"));
    }

    let service = open_service().await?;
    let mut stream = service.ask(question);
    let mut printed_any = false;

    while let Some(event) = stream.next().await {
        match event {
            ChatEvent::Sources { sources } if !sources.is_empty() => {
                println!("  Sources:");
                for source in &sources {
                    println!("    - {} ({})", source.title, source.url);
                }
                println!();
            }
            ChatEvent::Answer { text, is_complete } => {
                if !is_complete {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                    printed_any = true;
                } else if !printed_any {
                    // No partial fragments were streamed; print the whole answer.
                    println!("{text}");
                }
            }
            _ => {}
        }
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("  Wrote default config to {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let rendered = toml::to_string_pretty(&config)?;
    println!("{rendered}");
    Ok(())
}
