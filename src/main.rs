//! # SDG Discovery CLI (`sdg`)
//!
//! Command-line front end for source discovery, document ingestion and the
//! challenge/pathway agents. Every command reads `--config` (default
//! `./config/sdg.toml`). Summaries go to stdout; logs go to stderr and are
//! controlled with `RUST_LOG`.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sdg init` | Create the SQLite database and schema |
//! | `sdg seed` | Upsert the source seed file and the prompt registry |
//! | `sdg sources list\|endpoints\|add-endpoint` | Inspect and extend sources |
//! | `sdg discover endpoint <id>\|source <id>` | Discover documents |
//! | `sdg documents list\|fetch\|fetch-pending\|text` | Download and read documents |
//! | `sdg challenges extract\|list` | Extract challenges from text |
//! | `sdg pathways discover\|list` | Technology paths for a challenge |
//! | `sdg prompts sync\|list\|usage` | Prompt registry and provenance |
//! | `sdg suggest-urls "<query>"` | Ask the suggest model for report URLs |
//! | `sdg serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! sdg init --config ./config/sdg.toml
//! sdg sources add-endpoint 1 https://www.undp.org/sitemap.xml --type sitemap \
//!     --parser-hint '{"includePathPrefixes":["/publications/"]}'
//! sdg discover endpoint 4
//! sdg documents fetch-pending --limit 20
//! sdg challenges extract --file ./report.txt --source-org UNDP
//! ```

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

use sdg_discovery::agents::url_suggest;
use sdg_discovery::challenges::{self, CliInput};
use sdg_discovery::documents::{self, DocumentFilter};
use sdg_discovery::models::{DocumentStatus, EndpointType};
use sdg_discovery::sources::{self, EndpointInput};
use sdg_discovery::{config, discovery, ingest, migrate, pathways, prompts, server};

/// SDG Discovery: sustainability report harvesting with LLM-assisted
/// challenge extraction and technology discovery.
#[derive(Parser)]
#[command(
    name = "sdg",
    about = "SDG Discovery: harvest sustainability reports and derive challenges and technology pathways",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sdg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Upsert sources/endpoints from the seed file and sync prompt templates.
    Seed,

    /// Inspect and extend crawlable sources.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Discover document URLs from endpoints.
    Discover {
        #[command(subcommand)]
        action: DiscoverAction,
    },

    /// Download, extract and read documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Extract and list challenges.
    Challenges {
        #[command(subcommand)]
        action: ChallengesAction,
    },

    /// Discover and list technology paths.
    Pathways {
        #[command(subcommand)]
        action: PathwaysAction,
    },

    /// Prompt registry and usage.
    Prompts {
        #[command(subcommand)]
        action: PromptsAction,
    },

    /// Ask the suggest model for candidate report URLs. Nothing is stored.
    SuggestUrls {
        query: String,

        #[arg(long, default_value = "50")]
        max_urls: usize,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SourcesAction {
    /// List all sources.
    List,
    /// List a source's endpoints in priority order.
    Endpoints { source_id: i64 },
    /// Add or update an endpoint (keyed by URL).
    AddEndpoint {
        source_id: i64,
        url: String,

        /// rss, sitemap, html_list, api or manual_seed.
        #[arg(long = "type", default_value = "sitemap")]
        endpoint_type: String,

        /// JSON with includePathPrefixes / excludePathPrefixes.
        #[arg(long)]
        parser_hint: Option<String>,

        #[arg(long)]
        priority: Option<i64>,

        #[arg(long)]
        disabled: bool,
    },
}

#[derive(Subcommand)]
enum DiscoverAction {
    /// Discover documents from one endpoint.
    Endpoint { endpoint_id: i64 },
    /// Discover from every enabled endpoint of a source.
    Source { source_id: i64 },
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List documents, newest first.
    List {
        #[arg(long)]
        source_id: Option<i64>,

        /// discovered, downloaded, extracted or failed.
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },
    /// Download one document and extract its text.
    Fetch { document_id: i64 },
    /// Download every `discovered` document, oldest first.
    FetchPending {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Print a document's extracted text.
    Text {
        document_id: i64,

        #[arg(long)]
        max_chars: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ChallengesAction {
    /// Extract challenges from text, a file, or a stored document.
    #[command(group(ArgGroup::new("input").required(true).args(["text", "file", "document"])))]
    Extract {
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long)]
        document: Option<i64>,

        #[arg(long)]
        source_org: Option<String>,

        #[arg(long)]
        source_url: Option<String>,
    },
    /// List stored challenges.
    List,
}

#[derive(Subcommand)]
enum PathwaysAction {
    /// Run technology discovery for a challenge.
    Discover {
        challenge_id: i64,

        /// Budget in EUR (default 10000).
        #[arg(long)]
        budget: Option<i64>,
    },
    /// List runs and paths for a challenge.
    List { challenge_id: i64 },
}

#[derive(Subcommand)]
enum PromptsAction {
    /// Sync the registry file into the database.
    Sync,
    /// List stored prompt templates.
    List,
    /// Show which runs used which prompt versions.
    Usage {
        #[arg(long, default_value = "100")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed => {
            sources::run_seed(&cfg).await?;
        }
        Commands::Sources { action } => match action {
            SourcesAction::List => sources::run_list_sources(&cfg).await?,
            SourcesAction::Endpoints { source_id } => {
                sources::run_list_endpoints(&cfg, source_id).await?
            }
            SourcesAction::AddEndpoint {
                source_id,
                url,
                endpoint_type,
                parser_hint,
                priority,
                disabled,
            } => {
                let endpoint_type: EndpointType = endpoint_type.parse()?;
                let input = EndpointInput {
                    source_id,
                    endpoint_url: url,
                    endpoint_type,
                    parser_hint,
                    enabled: Some(!disabled),
                    priority,
                };
                sources::run_add_endpoint(&cfg, input).await?;
            }
        },
        Commands::Discover { action } => match action {
            DiscoverAction::Endpoint { endpoint_id } => {
                discovery::run_discover_endpoint(&cfg, endpoint_id).await?
            }
            DiscoverAction::Source { source_id } => {
                discovery::run_discover_source(&cfg, source_id).await?
            }
        },
        Commands::Documents { action } => match action {
            DocumentsAction::List {
                source_id,
                status,
                limit,
            } => {
                let status: Option<DocumentStatus> = status.map(|s| s.parse()).transpose()?;
                let filter = DocumentFilter {
                    source_id,
                    status,
                    limit,
                };
                documents::run_list(&cfg, filter).await?;
            }
            DocumentsAction::Fetch { document_id } => ingest::run_fetch(&cfg, document_id).await?,
            DocumentsAction::FetchPending { limit } => {
                ingest::run_fetch_pending(&cfg, limit).await?
            }
            DocumentsAction::Text {
                document_id,
                max_chars,
            } => documents::run_text(&cfg, document_id, max_chars).await?,
        },
        Commands::Challenges { action } => match action {
            ChallengesAction::Extract {
                text,
                file,
                document,
                source_org,
                source_url,
            } => {
                let input = match (text, file.as_deref(), document) {
                    (Some(text), _, _) => CliInput::Text(text),
                    (None, Some(path), _) => CliInput::File(path),
                    (None, None, Some(id)) => CliInput::Document(id),
                    (None, None, None) => anyhow::bail!("one of --text, --file or --document is required"),
                };
                challenges::run_extract(&cfg, input, source_org, source_url).await?;
            }
            ChallengesAction::List => challenges::run_list(&cfg).await?,
        },
        Commands::Pathways { action } => match action {
            PathwaysAction::Discover {
                challenge_id,
                budget,
            } => pathways::run_discover(&cfg, challenge_id, budget).await?,
            PathwaysAction::List { challenge_id } => pathways::run_list(&cfg, challenge_id).await?,
        },
        Commands::Prompts { action } => match action {
            PromptsAction::Sync => prompts::run_sync(&cfg).await?,
            PromptsAction::List => prompts::run_list(&cfg).await?,
            PromptsAction::Usage { limit } => prompts::run_usage(&cfg, limit).await?,
        },
        Commands::SuggestUrls { query, max_urls } => {
            url_suggest::run_suggest(&cfg, &query, max_urls).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
