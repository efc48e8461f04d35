//! Cascade CLI: waterfall enrichment, single-source search, cost estimates.
//!
//! Usage:
//!   cascade enrich --input leads.json [--concurrency 5] [--no-ai]
//!   cascade search --source primary --domain acme.com
//!   cascade verify --email jane@acme.com
//!   cascade cost --model claude-3-haiku --input-tokens 1200 --output-tokens 400

use cascade::source::{
    AiResearcherProvider, PrimaryDirectoryProvider, ProfileNetworkProvider, SourceAdapter,
    WebsiteCrawlerProvider,
};
use cascade::{
    AdapterSession, BatchRunner, CancellationToken, CascadeConfig, EnrichmentRecord,
    LimiterRegistry, SearchCriteria, SourceError, SourceKind, SourceProvider, SourceToggles,
    WaterfallOrchestrator,
};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cascade", version, about = "Waterfall contact enrichment")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich records (JSON array or JSON lines) through the waterfall
    Enrich {
        /// Input file, or '-' for stdin
        #[arg(long, default_value = "-")]
        input: String,
        /// Records enriched concurrently (defaults to batch.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        no_primary: bool,
        #[arg(long)]
        no_network: bool,
        #[arg(long)]
        no_ai: bool,
        /// Cancel whatever is still running after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Query a single source
    Search {
        /// primary, network, website or ai
        #[arg(long)]
        source: SourceKind,
        #[arg(long)]
        domain: Vec<String>,
        #[arg(long)]
        company: Vec<String>,
        #[arg(long)]
        title: Vec<String>,
        #[arg(long)]
        profile_url: Vec<String>,
        #[arg(long, default_value_t = 100)]
        max: usize,
    },
    /// Check an email's deliverability with the people directory
    Verify {
        #[arg(long)]
        email: String,
    },
    /// Estimate the cost of a model call
    Cost {
        #[arg(long)]
        model: String,
        #[arg(long)]
        input_tokens: u64,
        #[arg(long)]
        output_tokens: u64,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn read_records(input: &str) -> Result<Vec<EnrichmentRecord>, String> {
    let text = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("cannot read stdin: {}", e))?;
        buf
    } else {
        std::fs::read_to_string(Path::new(input))
            .map_err(|e| format!("cannot read {}: {}", input, e))?
    };
    parse_records(&text)
}

/// Accept either a JSON array of objects or one object per line.
fn parse_records(text: &str) -> Result<Vec<EnrichmentRecord>, String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid input: {}", e));
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| format!("invalid record on line {}: {}", i + 1, e))
        })
        .collect()
}

fn runtime() -> Result<tokio::runtime::Runtime, i32> {
    tokio::runtime::Runtime::new().map_err(|e| {
        eprintln!("failed to create tokio runtime: {}", e);
        1
    })
}

fn cmd_enrich(
    config: &CascadeConfig,
    input: &str,
    concurrency: Option<usize>,
    toggles: SourceToggles,
    timeout: Option<Duration>,
) -> i32 {
    let records = match read_records(input) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let limiters = LimiterRegistry::new();
    let orchestrator = match WaterfallOrchestrator::from_config(config, &limiters) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if orchestrator.source_kinds().is_empty() {
        eprintln!("Error: no sources configured; set credentials in the config file or environment");
        return 1;
    }
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    rt.block_on(async {
        let cancel = CancellationToken::new();
        if let Some(timeout) = timeout {
            cancel.cancel_after(timeout);
        }
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, cancelling");
                on_interrupt.cancel();
            }
        });

        let runner = BatchRunner::new(Arc::new(orchestrator)).with_toggles(toggles);
        let outcomes = runner
            .run_batch_with_cancel(
                records,
                concurrency.unwrap_or(config.batch.concurrency),
                &cancel,
            )
            .await;

        match serde_json::to_string_pretty(&outcomes) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
        let stats = runner.orchestrator().stats();
        eprintln!(
            "enriched {} of {} (primary {}, network {}, ai {}), failed {}, cost ${:.6}",
            stats.total_enriched,
            stats.processed(),
            stats.primary_hits,
            stats.network_hits,
            stats.ai_hits,
            stats.failed,
            stats.total_cost
        );
        if let Some(costs) = runner.orchestrator().cost_estimator() {
            let totals = costs.totals();
            eprintln!(
                "model usage: {} calls, {} input / {} output tokens, ${:.6}",
                totals.calls,
                totals.input_tokens,
                totals.output_tokens,
                costs.total_cost()
            );
        }
        0
    })
}

fn provider_for(
    kind: SourceKind,
    config: &CascadeConfig,
    limiters: &LimiterRegistry,
) -> Result<Box<dyn SourceProvider>, SourceError> {
    let retry = config.retry.clone();
    Ok(match kind {
        SourceKind::Primary => Box::new(PrimaryDirectoryProvider::new(&config.primary, retry, limiters)?),
        SourceKind::Network => Box::new(ProfileNetworkProvider::new(&config.network, retry, limiters)?),
        SourceKind::Website => Box::new(WebsiteCrawlerProvider::new(&config.website, retry, limiters)),
        SourceKind::Ai => Box::new(AiResearcherProvider::new(
            &config.ai,
            config.pricing.clone(),
            retry,
            limiters,
        )?),
    })
}

fn cmd_search(config: &CascadeConfig, kind: SourceKind, criteria: SearchCriteria) -> i32 {
    let limiters = LimiterRegistry::new();
    let provider = match provider_for(kind, config, &limiters) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    rt.block_on(async {
        let cancel = CancellationToken::new();
        let adapter = match provider.create() {
            Ok(a) => a,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        let mut session = match AdapterSession::open(adapter, &cancel).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        let searched = session.search(&criteria, &cancel).await;
        let stats = session.close().await;
        let code = match searched {
            Ok(results) => match serde_json::to_string_pretty(&results) {
                Ok(json) => {
                    println!("{}", json);
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            },
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        };
        eprintln!(
            "{} requests ({} failed), {} items, {:.1}s",
            stats.total_requests,
            stats.failed_requests,
            stats.items_found,
            stats.duration_seconds()
        );
        code
    })
}

fn cmd_verify(config: &CascadeConfig, email: &str) -> i32 {
    let limiters = LimiterRegistry::new();
    let provider = match PrimaryDirectoryProvider::new(&config.primary, config.retry.clone(), &limiters) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    rt.block_on(async {
        let cancel = CancellationToken::new();
        let mut adapter = provider.adapter();
        if let Err(e) = adapter.open(&cancel).await {
            eprintln!("Error: {}", e);
            return 1;
        }
        let verdict = adapter.verify_email(email, &cancel).await;
        adapter.close().await;
        match verdict.and_then(|v| serde_json::to_string_pretty(&v).map_err(SourceError::from)) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        }
    })
}

fn cmd_cost(config: &CascadeConfig, model: &str, input_tokens: u64, output_tokens: u64) -> i32 {
    let cost = config.pricing.estimate(model, input_tokens, output_tokens);
    println!("{:.6}", cost);
    0
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match CascadeConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Enrich {
            input,
            concurrency,
            no_primary,
            no_network,
            no_ai,
            timeout_secs,
        } => {
            let toggles = SourceToggles {
                primary: !no_primary,
                network: !no_network,
                ai: !no_ai,
            };
            cmd_enrich(
                &config,
                &input,
                concurrency,
                toggles,
                timeout_secs.map(Duration::from_secs),
            )
        }
        Commands::Search {
            source,
            domain,
            company,
            title,
            profile_url,
            max,
        } => {
            let criteria = SearchCriteria {
                company_domains: domain,
                company_names: company,
                job_titles: title,
                profile_urls: profile_url,
                max_results: max,
                ..SearchCriteria::default()
            };
            cmd_search(&config, source, criteria)
        }
        Commands::Verify { email } => cmd_verify(&config, &email),
        Commands::Cost {
            model,
            input_tokens,
            output_tokens,
        } => cmd_cost(&config, &model, input_tokens, output_tokens),
    };
    std::process::exit(code);
}
