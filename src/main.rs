mod api;
mod cache;
mod config;
mod display;
mod error;
mod features;
mod gis;
mod logger;
mod store;

use api::client::RiotApiClient;
use cache::RawMatchCache;
use clap::{Parser, Subcommand};
use config::{Config, PlayerProfile};
use display::output::{
    display_batch, display_error, display_info, display_match, display_rebuild, display_success, display_summary,
    display_weights,
};
use error::AppError;
use gis::engine::GisEngine;
use gis::sources::{MasteryLookup, MatchSource, NoMastery};
use gis::weights::{RawRoleWeights, WeightsDocument, WeightsStore};
use indicatif::ProgressBar;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use store::Store;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "loltrack")]
#[command(about = "Track ranked growth with the Growth Improvement Score", long_about = None)]
struct Args {
    /// Region / platform id (default: RIOT_REGION or na1)
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch recent matches for a Riot ID and score them
    Sync {
        /// Riot Game Name
        game_name: String,
        /// Riot Tag (tag line)
        tag_line: String,
        /// Number of recent matches to fetch (max 100)
        #[arg(short, long, default_value = "20")]
        count: usize,
    },
    /// Show smoothed scores, calibration and focus for a context
    Summary {
        #[arg(short, long)]
        queue: Option<i32>,
        /// TOP, JUNGLE, MIDDLE/MID, BOTTOM/ADC, UTILITY/SUPPORT
        #[arg(long)]
        role: Option<String>,
    },
    /// Per-match domain scores and z drill-down
    Match {
        match_id: String,
        /// Recompute even if a contribution is cached
        #[arg(long)]
        force: bool,
    },
    /// Replay the tracked player's ranked history from scratch
    Rebuild {
        #[arg(short, long)]
        queue: Option<i32>,
        /// Keep existing baselines and scores instead of clearing first
        #[arg(long)]
        keep: bool,
    },
    /// Inspect or replace role weights
    Weights {
        #[command(subcommand)]
        action: WeightsAction,
    },
}

#[derive(Subcommand, Debug)]
enum WeightsAction {
    Show,
    /// Replace weights from a JSON file (requires LOLTRACK_ADMIN=1)
    Set { file: PathBuf },
}

fn main() {
    let args = Args::parse();
    logger::init_logging(&args.log_level);

    if let Err(e) = run(args) {
        display_error(&e.to_string());
        std::process::exit(1);
    }
}

/// Cache-backed engine; goes online only when an API key is configured.
fn build_engine(config: &Config) -> Result<(GisEngine, Option<Arc<RiotApiClient>>), AppError> {
    let client = match config.api_key {
        Some(_) => Some(Arc::new(RiotApiClient::new(config)?)),
        None => None,
    };
    let upstream = client
        .as_ref()
        .map(|c| Box::new(Arc::clone(c)) as Box<dyn MatchSource>);
    let mastery: Box<dyn MasteryLookup> = match &client {
        Some(c) => Box::new(Arc::clone(c)),
        None => Box::new(NoMastery),
    };

    let engine = GisEngine::new(
        Store::open(config.store_path())?,
        config.gis.clone(),
        WeightsStore::new(&config.weights_path),
        Box::new(RawMatchCache::new(config.match_cache_dir(), upstream)),
    )
    .with_mastery(mastery)
    .with_admin(config.admin);
    Ok((engine, client))
}

fn run(args: Args) -> Result<(), AppError> {
    let mut config = Config::from_env()?;
    if let Some(region) = args.region {
        config.region = region;
    }

    match args.command {
        Command::Sync {
            game_name,
            tag_line,
            count,
        } => sync(&config, &game_name, &tag_line, count),
        Command::Summary { queue, role } => {
            let profile = PlayerProfile::load(&config.data_dir)?;
            let (engine, _) = build_engine(&config)?;
            display_summary(&engine.summary(&profile.puuid, queue, role.as_deref()));
            Ok(())
        }
        Command::Match { match_id, force } => {
            let profile = PlayerProfile::load(&config.data_dir)?;
            let (engine, _) = build_engine(&config)?;
            let breakdown = engine.compute_on_open(&profile.puuid, &match_id, force)?;
            display_match(&breakdown);
            Ok(())
        }
        Command::Rebuild { queue, keep } => {
            let profile = PlayerProfile::load(&config.data_dir)?;
            let (engine, _) = build_engine(&config)?;
            display_info(&format!("Rebuilding scores for {}", profile.riot_id()));
            let report = engine.rebuild_all(&profile.puuid, queue, !keep)?;
            display_rebuild(&report);
            Ok(())
        }
        Command::Weights { action } => {
            let (engine, _) = build_engine(&config)?;
            match action {
                WeightsAction::Show => display_weights(&engine.role_weights()),
                WeightsAction::Set { file } => {
                    let content = fs::read_to_string(&file)?;
                    let raw: RawRoleWeights = match serde_json::from_str::<WeightsDocument>(&content) {
                        Ok(doc) => doc.roles,
                        Err(_) => serde_json::from_str(&content)
                            .map_err(|e| AppError::JsonError(format!("Failed to parse {}: {}", file.display(), e)))?,
                    };
                    engine.put_role_weights(&raw)?;
                    display_success(&format!("Role weights written to {}", config.weights_path.display()));
                }
            }
            Ok(())
        }
    }
}

fn sync(config: &Config, game_name: &str, tag_line: &str, count: usize) -> Result<(), AppError> {
    let (engine, client) = build_engine(config)?;
    let client = client.ok_or_else(|| {
        AppError::ConfigError("RIOT_API_KEY not found in environment or .env file".to_string())
    })?;

    display_info(&format!("Fetching data for {}#{} in region {}", game_name, tag_line, config.region));
    let account = client.get_account(game_name, tag_line)?;
    let profile = PlayerProfile {
        puuid: account.puuid,
        game_name: if account.game_name.is_empty() { game_name.to_string() } else { account.game_name },
        tag_line: if account.tag_line.is_empty() { tag_line.to_string() } else { account.tag_line },
    };
    profile.save(&config.data_dir)?;

    let match_ids = client.get_match_ids(&profile.puuid, count)?;
    let pb = ProgressBar::new(match_ids.len() as u64);
    pb.set_message("Fetching match details");
    for match_id in &match_ids {
        if let Err(e) = engine.ensure_registered(&profile.puuid, match_id) {
            warn!(match_id = %match_id, error = %e, "could not register match");
        }
        pb.inc(1);
    }
    pb.finish_with_message("✓ Match data fetched");

    let report = engine.process_new_matches(&profile.puuid, None);
    display_batch(&report);
    display_summary(&engine.summary(&profile.puuid, None, None));
    Ok(())
}
