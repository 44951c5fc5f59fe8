//! Travel-purpose CLI: binary entrypoint.
//! Classifies cities from cached tags, queries the simple-tags dataset and
//! serves the same operations over HTTP (`tpurpose serve`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use travel_purpose::api;
use travel_purpose::config::AppConfig;
use travel_purpose::metrics::Metrics;
use travel_purpose::prediction::Prediction;
use travel_purpose::service::{PredictOptions, PurposeService};
use travel_purpose::simple_tags::{CityTags, SimpleTag};
use travel_purpose::synthetic::{self, SyntheticCityEngine};
use travel_purpose::tags::Source;
use travel_purpose::temporal::Season;

const ENV_LOG_FORMAT: &str = "TRAVELPURPOSE_LOG_FORMAT";

#[derive(Parser, Debug)]
#[command(name = "tpurpose", author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(long, env = "TRAVELPURPOSE_CONFIG_PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predict travel purposes for a city
    Predict {
        city: String,
        /// Travel month (1-12)
        #[arg(long)]
        month: Option<u32>,
        /// Travel season (winter, spring, summer, fall)
        #[arg(long)]
        season: Option<Season>,
        /// Include confidence breakdown and reasons
        #[arg(long)]
        explain: bool,
        /// Print the full prediction as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show cached tags for a city
    Tags {
        city: String,
        /// Only tags from this source
        #[arg(long)]
        source: Option<Source>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Search cities by name or country in the simple-tags dataset
    Find { query: String },
    /// Simple tags for a city, or all cities carrying a tag
    SimpleTags {
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        tag: Option<SimpleTag>,
        /// Dataset statistics
        #[arg(long)]
        stats: bool,
    },
    /// Print the ontology summary as JSON
    Ontology,
    /// List cities with dataset or cached tag evidence
    Cities,
    /// Generate noisy synthetic profiles around a city's main-category scores
    Synthetic {
        /// City whose prediction seeds the base distribution
        #[arg(long)]
        like: String,
        #[arg(short, long, default_value_t = 100)]
        n: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = synthetic::DEFAULT_NOISE)]
        noise: f32,
        /// JSONL output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Serve the HTTP API
    Serve {
        /// Overrides `[server] bind`
        #[arg(long)]
        bind: Option<String>,
    },
}

/// Install the tracing subscriber. Logs go to stderr so stdout stays parseable.
fn enable_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; no-op otherwise.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    enable_tracing(cli.verbose);

    let cfg = AppConfig::load_with(cli.config.as_deref())?;

    match cli.command {
        Command::Predict {
            city,
            month,
            season,
            explain,
            json,
        } => {
            let svc = PurposeService::from_config(cfg)?;
            let opts = PredictOptions {
                month,
                season,
                explain,
            };
            let p = svc.predict(&city, &opts).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&p)?);
            } else {
                print_prediction(&city, &p, &svc.simple_tags_for(&p));
            }
        }
        Command::Tags { city, source, limit } => {
            let svc = PurposeService::from_config(cfg)?;
            let tags = svc.tags(&city, source, limit).await?;
            if tags.is_empty() {
                println!("no tags for {city}");
            }
            for t in tags {
                println!("{:<14} {:<16} {}", t.source(), t.evidence_type(), t.raw_text());
            }
        }
        Command::Find { query } => {
            let svc = PurposeService::from_config(cfg)?;
            let hits = svc.search(&query);
            if hits.is_empty() {
                println!("no cities match `{query}`");
            }
            for c in &hits {
                print_city(c);
            }
        }
        Command::SimpleTags {
            city,
            country,
            tag,
            stats,
        } => {
            let svc = PurposeService::from_config(cfg)?;
            if stats {
                println!("{}", serde_json::to_string_pretty(&svc.simple_statistics())?);
            } else if let Some(tag) = tag {
                for c in svc.cities_with_tag(tag) {
                    print_city(&c);
                }
            } else if let Some(city) = city {
                match svc.simple_tags(&city, country.as_deref()) {
                    Some(c) => print_city(&c),
                    None => println!("city not found: {city}"),
                }
            } else {
                anyhow::bail!("give a city, --tag or --stats");
            }
        }
        Command::Ontology => {
            let svc = PurposeService::from_config(cfg)?;
            println!("{}", serde_json::to_string_pretty(&svc.ontology_summary())?);
        }
        Command::Cities => {
            let svc = PurposeService::from_config(cfg)?;
            for city in svc.available_cities().await? {
                println!("{city}");
            }
        }
        Command::Synthetic {
            like,
            n,
            seed,
            noise,
            out,
        } => {
            let svc = PurposeService::from_config(cfg)?;
            let p = svc.predict(&like, &PredictOptions::default()).await?;
            let base = synthetic::base_from_prediction(&p);
            if base.is_empty() {
                anyhow::bail!("no main-category scores for {like} to build profiles from");
            }
            let cities = SyntheticCityEngine::new(seed)
                .with_noise(noise)?
                .generate(&base, n)?;
            match out {
                Some(path) => synthetic::export_jsonl(&cities, &path)?,
                None => synthetic::write_jsonl(&cities, std::io::stdout().lock())?,
            }
        }
        Command::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| cfg.server.bind.clone());
            // recorder first, so the service's metric descriptions reach it
            let metrics = Metrics::install()?;
            let svc = PurposeService::from_config(cfg)?;
            metrics.record_tables(&svc);
            let app = api::create_router(svc).merge(metrics.router());

            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(%addr, "listening");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

fn print_prediction(city: &str, p: &Prediction, simple: &[SimpleTag]) {
    println!("{city} ({:?}, confidence {:.2})", p.origin, p.confidence);
    if p.is_empty() {
        println!("  no travel purpose found");
        return;
    }
    let main: Vec<&str> = p.main.iter().map(|m| m.as_str()).collect();
    println!("  main:   {}", main.join(", "));
    println!("  sub:    {}", p.sub.join(", "));
    let simple: Vec<&str> = simple.iter().map(|t| t.as_str()).collect();
    println!("  simple: {}", simple.join(", "));
    if let Some(b) = &p.confidence_breakdown {
        println!(
            "  breakdown: agreement {:.2} + ontology {:.2} + density {:.2} + authority {:.2} - ambiguity {:.2}",
            b.source_agreement(),
            b.ontology_strength(),
            b.tag_density(),
            b.authority_weight(),
            b.ambiguity_penalty()
        );
    }
    for r in &p.reasons {
        println!("  - {}", r.message);
    }
}

fn print_city(c: &CityTags) {
    let tags: Vec<&str> = c.tags.iter().map(|t| t.as_str()).collect();
    println!("{}, {} [{}]: {}", c.city, c.country, c.region, tags.join(", "));
}
