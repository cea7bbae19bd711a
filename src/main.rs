use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use medlit::config::{load_config, Config, LoggingConfig, LOCAL_CONFIG_FILE};
use medlit::mcp::{McpServer, ReturnFormat, SearchArgs, SearchDefaults};
use medlit::models::{PatientSummary, SearchResult, Strategy};
use medlit::search::{OrchestratorSettings, SearchContext, SearchOrchestrator};
use medlit::sources::SourceRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Federated clinical case-report search over PubMed, PMC and KoreaMed
#[derive(Parser, Debug)]
#[command(name = "medlit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Federated clinical case-report search over PubMed, PMC and KoreaMed", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for search results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Structured JSON
    Json,
    /// Title, summary and link table
    Compact,
    /// Markdown with abstracts and highlights
    Detailed,
}

impl From<OutputFormat> for ReturnFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ReturnFormat::Json,
            OutputFormat::Compact => ReturnFormat::Compact,
            OutputFormat::Detailed => ReturnFormat::Detailed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StrategyArg {
    NarrowToBroad,
    BroadToNarrow,
}

impl From<StrategyArg> for Strategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::NarrowToBroad => Strategy::NarrowToBroad,
            StrategyArg::BroadToNarrow => Strategy::BroadToNarrow,
        }
    }
}

/// Patient presentation flags
#[derive(Args, Debug, Clone)]
struct PatientArgs {
    /// Core symptoms (comma-separated)
    #[arg(long, value_delimiter = ',')]
    core: Vec<String>,

    /// Secondary symptoms (comma-separated)
    #[arg(long, value_delimiter = ',')]
    secondary: Vec<String>,

    /// Clinical context such as region or exposure (comma-separated)
    #[arg(long, value_delimiter = ',')]
    context: Vec<String>,

    /// Course of illness
    #[arg(long, default_value = "")]
    timeline: String,
}

impl PatientArgs {
    fn summary(&self) -> PatientSummary {
        PatientSummary::new(self.core.iter().cloned())
            .secondary(self.secondary.iter().cloned())
            .context(self.context.iter().cloned())
            .timeline(self.timeline.clone())
    }
}

/// Database selection, limits and exclusions
#[derive(Args, Debug, Clone)]
struct SearchFlags {
    /// Databases to search: pubmed, pmc, koreamed, all (comma-separated)
    #[arg(long = "db", value_delimiter = ',')]
    databases: Vec<String>,

    /// Maximum records per database
    #[arg(long, short = 'n')]
    max_results: Option<usize>,

    /// Excluded diagnoses (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Other excluded terms (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_term: Vec<String>,

    /// Keep substance-abuse related records
    #[arg(long)]
    substance_context_relevant: bool,

    /// Publication types (default: Case Reports)
    #[arg(long, value_delimiter = ',')]
    publication_type: Vec<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Compact)]
    format: OutputFormat,
}

impl SearchFlags {
    fn to_args(&self) -> SearchArgs {
        SearchArgs {
            databases: (!self.databases.is_empty()).then(|| self.databases.clone()),
            max_results_per_db: self.max_results,
            publication_types: (!self.publication_type.is_empty())
                .then(|| self.publication_type.clone()),
            excluded_diagnoses: self.exclude.clone(),
            excluded_terms: self.exclude_term.clone(),
            substance_context_relevant: self.substance_context_relevant,
            return_format: self.format.into(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server
    Serve {
        /// Serve streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,

        /// Port for HTTP mode
        #[arg(long, short, default_value_t = 3000)]
        port: u16,

        /// Host to bind to for HTTP mode
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Search all databases with one query
    #[command(alias = "s")]
    Search {
        /// Query in PubMed syntax
        query: String,

        #[command(flatten)]
        flags: SearchFlags,
    },

    /// Generate queries from a patient summary without searching
    Queries {
        #[command(flatten)]
        patient: PatientArgs,

        /// Excluded diagnoses (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },

    /// Search with generated queries in strategy order
    Strategy {
        #[command(flatten)]
        patient: PatientArgs,

        /// Issue order of generated queries
        #[arg(long, value_enum, default_value_t = StrategyArg::NarrowToBroad)]
        strategy: StrategyArg,

        #[command(flatten)]
        flags: SearchFlags,
    },

    /// Run several queries in order and merge the results
    Multi {
        /// Queries to run
        #[arg(required = true)]
        queries: Vec<String>,

        #[command(flatten)]
        flags: SearchFlags,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a starter configuration file
    Init {
        /// Destination (default: ./medlit.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("medlit={}", level)));

    // stdout carries MCP framing and results, so logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json || logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_orchestrator(config: &Config) -> Result<Arc<SearchOrchestrator>> {
    let registry = SourceRegistry::from_config(config).context("Failed to initialise sources")?;
    if registry.is_empty() {
        tracing::warn!("No database adapters are enabled");
    }
    Ok(Arc::new(SearchOrchestrator::new(
        Arc::new(registry),
        OrchestratorSettings::from_config(config),
    )))
}

fn print_result(result: &SearchResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Compact => {
            println!("{}", medlit::utils::compact_table(result));
            println!("{}", medlit::utils::execution_summary(result));
        }
        OutputFormat::Detailed => {
            println!("{}", medlit::utils::detailed_markdown(result));
            println!("{}", medlit::utils::execution_summary(result));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&cli, &config.logging);

    let defaults = SearchDefaults {
        max_results_per_db: config.search.max_results_per_db,
    };

    match &cli.command {
        Commands::Serve { http, port, host } => {
            let server = McpServer::new(build_orchestrator(&config)?, defaults)?;

            if *http {
                let addr = format!("{}:{}", host, port);
                let (bound_addr, handle) = server.run_http(&addr).await?;
                tracing::info!("MCP server listening on {}", bound_addr);

                handle
                    .await
                    .map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?;
            } else {
                server.run().await?;
            }
        }

        Commands::Search { query, flags } => {
            let orchestrator = build_orchestrator(&config)?;
            let args = flags.to_args();
            let request = args
                .options(&defaults)
                .map_err(anyhow::Error::msg)?
                .request(medlit::models::Query::from_text(query.trim()));
            let ctx = SearchContext::new(
                PatientSummary::from_query_texts(&[query.as_str()]),
                args.exclusions(),
            );

            let result = orchestrator.search_all(&request, &ctx).await?;
            print_result(&result, flags.format)?;
        }

        Commands::Queries { patient, exclude } => {
            let orchestrator = build_orchestrator(&config)?;
            let exclusions = medlit::models::ExclusionSet::with_diagnoses(exclude.iter().cloned());
            let queries = orchestrator.generate_queries(&patient.summary(), &exclusions)?;

            for query in &queries {
                println!("{}. {}", query.priority, query.text);
                println!("   {}", query.scope_description);
            }
        }

        Commands::Strategy {
            patient,
            strategy,
            flags,
        } => {
            let orchestrator = build_orchestrator(&config)?;
            let args = flags.to_args();
            let options = args.options(&defaults).map_err(anyhow::Error::msg)?;
            let ctx = SearchContext::new(patient.summary(), args.exclusions());

            let result = orchestrator
                .search_with_strategy(&ctx, (*strategy).into(), &options)
                .await?;
            print_result(&result, flags.format)?;
        }

        Commands::Multi { queries, flags } => {
            let orchestrator = build_orchestrator(&config)?;
            let args = flags.to_args();
            let options = args.options(&defaults).map_err(anyhow::Error::msg)?;
            let ctx = SearchContext::new(PatientSummary::default(), args.exclusions());

            let result = orchestrator
                .search_with_multiple_queries(queries, &ctx, &options)
                .await?;
            print_result(&result, flags.format)?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                let path = path.clone().unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists; use --force to overwrite",
                        path.display()
                    );
                }
                Config::default().save(&path)?;
                println!("Wrote {}", path.display());
            }
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_search_command() {
        let cli = Cli::parse_from([
            "medlit",
            "search",
            "fever AND rash",
            "--db",
            "pubmed,pmc",
            "-n",
            "3",
            "--exclude",
            "lupus",
        ]);
        match &cli.command {
            Commands::Search { query, flags } => {
                assert_eq!(query, "fever AND rash");
                assert_eq!(flags.databases, vec!["pubmed", "pmc"]);
                assert_eq!(flags.max_results, Some(3));
                assert_eq!(flags.format, OutputFormat::Compact);

                let args = flags.to_args();
                assert_eq!(args.excluded_diagnoses, vec!["lupus"]);
                assert_eq!(args.return_format, ReturnFormat::Compact);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_strategy_command() {
        let cli = Cli::parse_from([
            "medlit",
            "strategy",
            "--core",
            "fever,rash",
            "--context",
            "Korea",
            "--strategy",
            "broad-to-narrow",
        ]);
        match &cli.command {
            Commands::Strategy {
                patient, strategy, ..
            } => {
                assert_eq!(patient.summary().core_symptoms, vec!["fever", "rash"]);
                assert_eq!(Strategy::from(*strategy), Strategy::BroadToNarrow);
            }
            _ => panic!("Expected Strategy command"),
        }
    }

    #[test]
    fn test_cli_serve_defaults() {
        let cli = Cli::parse_from(["medlit", "serve"]);
        match &cli.command {
            Commands::Serve { http, port, host } => {
                assert!(!*http);
                assert_eq!(*port, 3000);
                assert_eq!(host, "127.0.0.1");
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_verbosity_flags() {
        let cli = Cli::parse_from(["medlit", "-vv", "config", "show"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_cli_multi_requires_queries() {
        assert!(Cli::try_parse_from(["medlit", "multi"]).is_err());
    }
}
