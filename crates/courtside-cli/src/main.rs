use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use courtside_storage::{MemoryStore, PgStore, Store};
use courtside_sync::{build_scheduler, Loaders, Orchestrator, SyncConfig};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "courtside")]
#[command(about = "NBA statistics ingestion into PostgreSQL")]
struct Cli {
    /// Keep everything in memory instead of PostgreSQL (pairs with FIXTURES_DIR).
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch one entity kind (or everything) and persist it.
    Load {
        #[arg(value_enum)]
        target: LoadTarget,
        #[arg(long)]
        season: Option<i32>,
        #[arg(long)]
        team_id: Option<i32>,
        /// Game date, YYYY-MM-DD.
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        game_id: Option<i32>,
    },
    /// Apply pending schema migrations.
    Migrate,
    /// Run `SELECT 1` and list the tables.
    CheckConnection,
    /// Print the effective configuration with secrets masked.
    ShowConfig,
    /// Run the daily ingestion job until interrupted.
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LoadTarget {
    Season,
    League,
    Teams,
    Players,
    PlayersTeams,
    Games,
    StatsPlayer,
    StatsPlayerBulk,
    TeamStats,
    TeamStatsBulk,
    All,
}

fn require(value: Option<i32>, flag: &str, target: LoadTarget) -> Result<i32> {
    match value {
        Some(value) => Ok(value),
        None => bail!("--{flag} is required for {target:?}"),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL")
            .map(|level| match level.trim().to_ascii_lowercase().as_str() {
                "warning" => "warn".to_string(),
                "critical" | "fatal" => "error".to_string(),
                other => other.to_string(),
            })
            .unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(format!("{level},sqlx=warn"))
            .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(config: &SyncConfig, memory: bool) -> Result<Arc<dyn Store>> {
    if memory {
        info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PgStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.redacted_database_url()))?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

async fn orchestrator(config: &SyncConfig, memory: bool) -> Result<Orchestrator> {
    let gateway = config.build_gateway()?;
    let store = open_store(config, memory).await?;
    let loaders = Loaders::new(gateway, store).with_primary_league(config.primary_league.clone());
    Ok(Orchestrator::new(loaders))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_load(
    orchestrator: &Orchestrator,
    target: LoadTarget,
    season: Option<i32>,
    team_id: Option<i32>,
    date: Option<NaiveDate>,
    game_id: Option<i32>,
) -> Result<()> {
    let loaders = orchestrator.loaders();
    match target {
        LoadTarget::Season => print_json(&loaders.load_season().await?),
        LoadTarget::League => print_json(&loaders.load_league().await?),
        LoadTarget::Teams => print_json(&loaders.load_teams().await?),
        LoadTarget::Players => {
            let season = require(season, "season", target)?;
            let team_id = require(team_id, "team-id", target)?;
            print_json(&loaders.load_players(Some(team_id), Some(season)).await?)
        }
        LoadTarget::PlayersTeams => {
            let season = require(season, "season", target)?;
            print_json(&orchestrator.load_team_players(season).await?)
        }
        LoadTarget::Games => {
            let season = require(season, "season", target)?;
            print_json(&loaders.load_games(season, date, team_id).await?)
        }
        LoadTarget::StatsPlayer => {
            let game_id = require(game_id, "game-id", target)?;
            print_json(&loaders.load_stats_player(game_id).await?)
        }
        LoadTarget::StatsPlayerBulk => {
            let season = require(season, "season", target)?;
            print_json(&orchestrator.load_stats_player_bulk(season, team_id).await?)
        }
        LoadTarget::TeamStats => {
            let season = require(season, "season", target)?;
            let team_id = require(team_id, "team-id", target)?;
            print_json(&loaders.load_team_stats(team_id, season).await?)
        }
        LoadTarget::TeamStatsBulk => {
            let season = require(season, "season", target)?;
            print_json(&orchestrator.load_team_stats_bulk(season).await?)
        }
        LoadTarget::All => {
            let season = require(season, "season", target)?;
            let summary = orchestrator.run_all(season, date, team_id).await?;
            info!(
                run_id = %summary.run_id,
                failed_items = summary.failed_items(),
                "full load finished"
            );
            print_json(&summary)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command {
        Commands::Load {
            target,
            season,
            team_id,
            date,
            game_id,
        } => {
            let orchestrator = orchestrator(&config, cli.memory).await?;
            run_load(&orchestrator, target, season, team_id, date, game_id).await?;
        }
        Commands::Migrate => {
            if cli.memory {
                bail!("migrate needs PostgreSQL; drop --memory");
            }
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied to {}", config.redacted_database_url());
        }
        Commands::CheckConnection => {
            if cli.memory {
                bail!("check-connection needs PostgreSQL; drop --memory");
            }
            let store = PgStore::connect(&config.database_url).await?;
            let report = store.check_connection().await?;
            println!("SELECT 1 returned {}", report.select_one);
            if report.tables.is_empty() {
                println!("no tables found; run `courtside migrate`");
            }
            for table in &report.tables {
                println!("table {table}");
            }
        }
        Commands::ShowConfig => {
            for (name, value) in config.describe() {
                println!("{name:<32} {value}");
            }
        }
        Commands::Schedule => {
            if !config.scheduler_enabled {
                bail!("set INGEST_SCHEDULER_ENABLED=true to run the scheduler");
            }
            let orchestrator = Arc::new(orchestrator(&config, cli.memory).await?);
            let Some(mut sched) = build_scheduler(orchestrator, &config).await? else {
                bail!("scheduler is disabled");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.ingest_cron, "scheduler running; press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl+C")?;
            if let Err(err) = sched.shutdown().await {
                warn!(error = %err, "scheduler did not shut down cleanly");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_targets_parse_with_scope_flags() {
        let cli = Cli::parse_from([
            "courtside",
            "--memory",
            "load",
            "stats-player-bulk",
            "--season",
            "2023",
            "--team-id",
            "17",
        ]);
        assert!(cli.memory);
        match cli.command {
            Commands::Load {
                target,
                season,
                team_id,
                date,
                game_id,
            } => {
                assert_eq!(target, LoadTarget::StatsPlayerBulk);
                assert_eq!(season, Some(2023));
                assert_eq!(team_id, Some(17));
                assert_eq!(date, None);
                assert_eq!(game_id, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn dates_parse_as_calendar_days() {
        let cli = Cli::parse_from(["courtside", "load", "games", "--season", "2023", "--date", "2023-10-24"]);
        let Commands::Load { date, .. } = cli.command else {
            panic!("expected load");
        };
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 10, 24));
        assert!(Cli::try_parse_from(["courtside", "load", "games", "--date", "24/10/2023"]).is_err());
    }

    #[test]
    fn missing_scope_is_an_error_naming_the_flag() {
        let err = require(None, "game-id", LoadTarget::StatsPlayer).unwrap_err();
        assert_eq!(err.to_string(), "--game-id is required for StatsPlayer");
        assert_eq!(require(Some(7), "season", LoadTarget::Games).unwrap(), 7);
    }
}
