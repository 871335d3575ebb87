//! Upstream HTTP transport, raw response archive and the relational storage
//! contract (PostgreSQL + in-memory) for Courtside.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courtside_core::{
    EntityKey, Game, GameTeamScore, NewRow, Player, PlayerGameStats, PlayerTeamSeason, StatLine,
    Team, TeamLeagueInfo, TeamSeasonStats,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Postgres, Transaction};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "courtside-storage";

#[derive(Debug, Clone)]
pub struct ArchivedResponse {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed, write-once archive of upstream response bodies.
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    root: PathBuf,
}

impl ResponseArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path_for(
        &self,
        fetched_at: DateTime<Utc>,
        endpoint: &str,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%d_%H%M%S").to_string();
        let endpoint_dir = endpoint
            .trim_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>();
        let endpoint_dir = if endpoint_dir.is_empty() {
            "root".to_string()
        } else {
            endpoint_dir
        };
        PathBuf::from(stamp)
            .join(endpoint_dir)
            .join(format!("{content_hash}.json"))
    }

    /// Writes through a temp file and an atomic rename; identical bodies dedupe.
    pub async fn store_body(
        &self,
        fetched_at: DateTime<Utc>,
        endpoint: &str,
        body: &[u8],
    ) -> anyhow::Result<ArchivedResponse> {
        let content_hash = Self::sha256_hex(body);
        let relative_path = self.relative_path_for(fetched_at, endpoint, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let Some(parent) = absolute_path.parent().map(Path::to_path_buf) else {
            bail!("archive path {} has no parent", absolute_path.display());
        };

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedResponse {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: body.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), body.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp archive file {}", temp_path.display()))?;
        file.write_all(body)
            .await
            .with_context(|| format!("writing temp archive file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp archive file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(archived(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(archived(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp archive file {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub backoff: BackoffPolicy,
    pub requests_per_minute: Option<u32>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            default_headers: Vec::new(),
            backoff: BackoffPolicy::default(),
            requests_per_minute: None,
        }
    }
}

/// Whole refill periods in `elapsed`, saturating at `u32::MAX`.
fn refills_for(elapsed: Duration, refill_every: Duration) -> u32 {
    let periods = elapsed.as_millis() / refill_every.as_millis().max(1);
    u32::try_from(periods).unwrap_or(u32::MAX)
}

/// Spaces requests out to respect the upstream per-minute quota.
#[derive(Debug)]
pub struct RequestPacer {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<PacerState>,
}

#[derive(Debug, Clone, Copy)]
struct PacerState {
    tokens: u32,
    last_refill: Instant,
}

impl RequestPacer {
    pub fn per_minute(requests: u32) -> Self {
        let requests = requests.max(1);
        Self::new(requests, Duration::from_secs(60) / requests)
    }

    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(PacerState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && !self.refill_every.is_zero() {
                let refills = refills_for(elapsed, self.refill_every);
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            drop(state);
            tokio::time::sleep(self.refill_every).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub fetched_at: DateTime<Utc>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    pacer: Option<RequestPacer>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let mut header_value =
                HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            header_value.set_sensitive(name.to_ascii_lowercase().contains("key"));
            headers.insert(header_name, header_value);
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            pacer: config.requests_per_minute.map(RequestPacer::per_minute),
            backoff: config.backoff,
        })
    }

    /// GET with bounded retries for transient failures.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let mut attempt = 0usize;
            loop {
                if let Some(pacer) = &self.pacer {
                    pacer.take().await;
                }

                let can_retry = attempt < self.backoff.max_retries;
                match self.client.get(url).query(query).send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = resp.url().to_string();
                        if status.is_success() {
                            let body = resp.bytes().await?.to_vec();
                            return Ok(FetchedResponse {
                                status,
                                final_url,
                                fetched_at: Utc::now(),
                                body,
                            });
                        }

                        if classify_status(status) == RetryDisposition::Retryable && can_retry {
                            warn!(%status, attempt, "transient upstream status; retrying");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        let body = resp.text().await.unwrap_or_default();
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                            body: body.chars().take(512).collect(),
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable && can_retry {
                            warn!(error = %err, attempt, "transient request failure; retrying");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// One transactional session. Inserts are staged until [`UnitOfWork::commit`].
#[async_trait]
pub trait UnitOfWork: Send {
    async fn exists(&mut self, key: &EntityKey) -> anyhow::Result<bool>;
    async fn insert(&mut self, row: NewRow) -> anyhow::Result<()>;
    /// Surrogate id of a league, looked up by its code.
    async fn league_id(&mut self, code: &str) -> anyhow::Result<Option<i32>>;
    /// Season of a stored game; `None` when the game is not stored.
    async fn game_season(&mut self, game_id: i32) -> anyhow::Result<Option<i32>>;
    async fn team_ids(&mut self) -> anyhow::Result<Vec<i32>>;
    async fn game_ids(&mut self, season: i32, team_id: Option<i32>) -> anyhow::Result<Vec<i32>>;
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn UnitOfWork>>;
}

/// Commits on success, rolls back and re-raises on failure.
///
/// The unit of work is consumed on every path; a unit of work dropped without
/// reaching this point is released by its own `Drop`.
pub async fn finish<T>(
    uow: Box<dyn UnitOfWork>,
    outcome: anyhow::Result<T>,
) -> anyhow::Result<T> {
    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "rollback failed after error: {err:#}");
            }
            Err(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub select_one: i32,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying migrations")
    }

    pub async fn check_connection(&self) -> anyhow::Result<ConnectionReport> {
        let select_one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("running SELECT 1")?;
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = 'public' ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing tables")?;
        Ok(ConnectionReport { select_one, tables })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.context("beginning transaction")?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

const STAT_COLUMNS: &str = "points, fgm, fga, fgp, ftm, fta, ftp, tpm, tpa, tpp, off_reb, \
                            def_reb, tot_reb, assists, p_fouls, steals, turnovers, blocks, plus_minus";

/// Placeholders for [`STAT_COLUMNS`] starting at `$first`; percentage columns are NUMERIC.
fn stat_placeholders(first: usize) -> String {
    (0..19)
        .map(|offset| {
            let n = first + offset;
            if matches!(offset, 3 | 6 | 9) {
                format!("${n}::numeric")
            } else {
                format!("${n}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_stat_line<'q>(
    query: Query<'q, Postgres, PgArguments>,
    line: &StatLine,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(line.points)
        .bind(line.fgm)
        .bind(line.fga)
        .bind(line.fgp)
        .bind(line.ftm)
        .bind(line.fta)
        .bind(line.ftp)
        .bind(line.tpm)
        .bind(line.tpa)
        .bind(line.tpp)
        .bind(line.off_reb)
        .bind(line.def_reb)
        .bind(line.tot_reb)
        .bind(line.assists)
        .bind(line.p_fouls)
        .bind(line.steals)
        .bind(line.turnovers)
        .bind(line.blocks)
        .bind(line.plus_minus)
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn exists(&mut self, key: &EntityKey) -> anyhow::Result<bool> {
        let conn = &mut *self.tx;
        let found: Result<bool, sqlx::Error> = match key {
            EntityKey::Season(season) => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM seasons WHERE season = $1)")
                    .bind(season)
                    .fetch_one(conn)
                    .await
            }
            EntityKey::League(code) => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM leagues WHERE code = $1)")
                    .bind(code)
                    .fetch_one(conn)
                    .await
            }
            EntityKey::Team(id) => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE id = $1)")
                    .bind(id)
                    .fetch_one(conn)
                    .await
            }
            EntityKey::TeamLeagueInfo { team_id, league_id } => sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM team_league_info WHERE team_id = $1 AND league_id = $2)",
            )
            .bind(team_id)
            .bind(league_id)
            .fetch_one(conn)
            .await,
            EntityKey::Game(id) => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM games WHERE id = $1)")
                    .bind(id)
                    .fetch_one(conn)
                    .await
            }
            EntityKey::GameTeamScore { game_id, is_home } => sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM game_team_scores WHERE game_id = $1 AND is_home = $2)",
            )
            .bind(game_id)
            .bind(is_home)
            .fetch_one(conn)
            .await,
            EntityKey::Player(id) => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM players WHERE id = $1)")
                    .bind(id)
                    .fetch_one(conn)
                    .await
            }
            EntityKey::PlayerTeamSeason {
                player_id,
                team_id,
                season,
                league_code,
            } => sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM player_team_season \
                 WHERE player_id = $1 AND team_id = $2 AND season = $3 AND league_code = $4)",
            )
            .bind(player_id)
            .bind(team_id)
            .bind(season)
            .bind(league_code)
            .fetch_one(conn)
            .await,
            EntityKey::PlayerGameStats {
                game_id,
                player_id,
                team_id,
            } => sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM player_game_stats \
                 WHERE game_id = $1 AND player_id = $2 AND team_id = $3)",
            )
            .bind(game_id)
            .bind(player_id)
            .bind(team_id)
            .fetch_one(conn)
            .await,
            EntityKey::TeamSeasonStats { team_id, season } => sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM team_season_stats WHERE team_id = $1 AND season = $2)",
            )
            .bind(team_id)
            .bind(season)
            .fetch_one(conn)
            .await,
        };
        found.with_context(|| format!("checking whether {key} exists"))
    }

    async fn insert(&mut self, row: NewRow) -> anyhow::Result<()> {
        let key = row.key();
        let conn = &mut *self.tx;
        let result = match &row {
            NewRow::Season(season) => {
                sqlx::query("INSERT INTO seasons (season) VALUES ($1)")
                    .bind(season.season)
                    .execute(conn)
                    .await
            }
            NewRow::League(league) => {
                sqlx::query("INSERT INTO leagues (code, description) VALUES ($1, $2)")
                    .bind(&league.code)
                    .bind(&league.description)
                    .execute(conn)
                    .await
            }
            NewRow::Team(team) => {
                sqlx::query(
                    "INSERT INTO teams (id, name, nickname, code, city, logo, all_star, nba_franchise) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(team.id)
                .bind(&team.name)
                .bind(&team.nickname)
                .bind(&team.code)
                .bind(&team.city)
                .bind(&team.logo)
                .bind(team.all_star)
                .bind(team.nba_franchise)
                .execute(conn)
                .await
            }
            NewRow::TeamLeagueInfo(info) => {
                sqlx::query(
                    "INSERT INTO team_league_info (team_id, league_id, conference, division) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(info.team_id)
                .bind(info.league_id)
                .bind(&info.conference)
                .bind(&info.division)
                .execute(conn)
                .await
            }
            NewRow::Game(game) => {
                sqlx::query(
                    "INSERT INTO games (id, league, season, date_start, date_end, duration, stage, \
                     status_short, status_long, periods_current, periods_total, periods_end_of_period, \
                     arena_name, arena_city, arena_state, arena_country, times_tied, lead_changes, \
                     nugget, home_team_id, away_team_id) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21)",
                )
                .bind(game.id)
                .bind(&game.league)
                .bind(game.season)
                .bind(game.date_start)
                .bind(game.date_end)
                .bind(&game.duration)
                .bind(game.stage)
                .bind(game.status_short)
                .bind(&game.status_long)
                .bind(game.periods_current)
                .bind(game.periods_total)
                .bind(game.periods_end_of_period)
                .bind(&game.arena_name)
                .bind(&game.arena_city)
                .bind(&game.arena_state)
                .bind(&game.arena_country)
                .bind(game.times_tied)
                .bind(game.lead_changes)
                .bind(&game.nugget)
                .bind(game.home_team_id)
                .bind(game.away_team_id)
                .execute(conn)
                .await
            }
            NewRow::GameTeamScore(score) => {
                sqlx::query(
                    "INSERT INTO game_team_scores (game_id, team_id, is_home, win, loss, series_win, \
                     series_loss, points, linescore_q1, linescore_q2, linescore_q3, linescore_q4) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                )
                .bind(score.game_id)
                .bind(score.team_id)
                .bind(score.is_home)
                .bind(score.win)
                .bind(score.loss)
                .bind(score.series_win)
                .bind(score.series_loss)
                .bind(score.points)
                .bind(score.linescore_q1)
                .bind(score.linescore_q2)
                .bind(score.linescore_q3)
                .bind(score.linescore_q4)
                .execute(conn)
                .await
            }
            NewRow::Player(player) => {
                sqlx::query(
                    "INSERT INTO players (id, firstname, lastname, birth_date, birth_country, \
                     nba_start, nba_pro, height_feet, height_inches, height_meters, weight_pounds, \
                     weight_kilograms, college, affiliation) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::numeric, $11, $12::numeric, $13, $14)",
                )
                .bind(player.id)
                .bind(&player.firstname)
                .bind(&player.lastname)
                .bind(player.birth_date)
                .bind(&player.birth_country)
                .bind(player.nba_start)
                .bind(player.nba_pro)
                .bind(player.height_feet)
                .bind(player.height_inches)
                .bind(player.height_meters)
                .bind(player.weight_pounds)
                .bind(player.weight_kilograms)
                .bind(&player.college)
                .bind(&player.affiliation)
                .execute(conn)
                .await
            }
            NewRow::PlayerTeamSeason(pts) => {
                sqlx::query(
                    "INSERT INTO player_team_season (player_id, team_id, season, league_code, \
                     jersey, active, pos) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(pts.player_id)
                .bind(pts.team_id)
                .bind(pts.season)
                .bind(&pts.league_code)
                .bind(pts.jersey)
                .bind(pts.active)
                .bind(&pts.pos)
                .execute(conn)
                .await
            }
            NewRow::PlayerGameStats(stats) => {
                let sql = format!(
                    "INSERT INTO player_game_stats (player_id, game_id, team_id, season, pos, \
                     minutes, comment, {STAT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, {})",
                    stat_placeholders(8)
                );
                let query = sqlx::query(&sql)
                    .bind(stats.player_id)
                    .bind(stats.game_id)
                    .bind(stats.team_id)
                    .bind(stats.season)
                    .bind(&stats.pos)
                    .bind(&stats.minutes)
                    .bind(&stats.comment);
                bind_stat_line(query, &stats.line).execute(conn).await
            }
            NewRow::TeamSeasonStats(stats) => {
                let sql = format!(
                    "INSERT INTO team_season_stats (team_id, season, games, fast_break_points, \
                     points_in_paint, biggest_lead, second_chance_points, points_off_turnovers, \
                     longest_run, {STAT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, {})",
                    stat_placeholders(10)
                );
                let query = sqlx::query(&sql)
                    .bind(stats.team_id)
                    .bind(stats.season)
                    .bind(stats.games)
                    .bind(stats.fast_break_points)
                    .bind(stats.points_in_paint)
                    .bind(stats.biggest_lead)
                    .bind(stats.second_chance_points)
                    .bind(stats.points_off_turnovers)
                    .bind(stats.longest_run);
                bind_stat_line(query, &stats.line).execute(conn).await
            }
        };
        result.with_context(|| format!("inserting {key}"))?;
        Ok(())
    }

    async fn league_id(&mut self, code: &str) -> anyhow::Result<Option<i32>> {
        sqlx::query_scalar("SELECT id FROM leagues WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await
            .with_context(|| format!("looking up league {code}"))
    }

    async fn game_season(&mut self, game_id: i32) -> anyhow::Result<Option<i32>> {
        sqlx::query_scalar("SELECT season FROM games WHERE id = $1")
            .bind(game_id)
            .fetch_optional(&mut *self.tx)
            .await
            .with_context(|| format!("looking up game {game_id}"))
    }

    async fn team_ids(&mut self) -> anyhow::Result<Vec<i32>> {
        sqlx::query_scalar("SELECT id FROM teams ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await
            .context("listing teams")
    }

    async fn game_ids(&mut self, season: i32, team_id: Option<i32>) -> anyhow::Result<Vec<i32>> {
        sqlx::query_scalar(
            "SELECT id FROM games WHERE season = $1 \
             AND ($2::int IS NULL OR home_team_id = $2 OR away_team_id = $2) \
             ORDER BY date_start, id",
        )
        .bind(season)
        .bind(team_id)
        .fetch_all(&mut *self.tx)
        .await
        .with_context(|| format!("listing games of season {season}"))
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.commit().await.context("committing transaction")
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.rollback().await.context("rolling back transaction")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredLeague {
    pub id: i32,
    pub code: String,
    pub description: Option<String>,
}

/// Committed contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub seasons: BTreeSet<i32>,
    pub leagues: BTreeMap<String, StoredLeague>,
    pub teams: BTreeMap<i32, Team>,
    pub team_league_info: BTreeMap<(i32, i32), TeamLeagueInfo>,
    pub games: BTreeMap<i32, Game>,
    pub game_team_scores: BTreeMap<(i32, bool), GameTeamScore>,
    pub players: BTreeMap<i32, Player>,
    pub player_team_seasons: BTreeMap<(i32, i32, i32, String), PlayerTeamSeason>,
    pub player_game_stats: BTreeMap<(i32, i32, i32), PlayerGameStats>,
    pub team_season_stats: BTreeMap<(i32, i32), TeamSeasonStats>,
    next_league_id: i32,
}

impl MemoryState {
    /// Total number of stored rows across every table.
    pub fn row_count(&self) -> usize {
        self.seasons.len()
            + self.leagues.len()
            + self.teams.len()
            + self.team_league_info.len()
            + self.games.len()
            + self.game_team_scores.len()
            + self.players.len()
            + self.player_team_seasons.len()
            + self.player_game_stats.len()
            + self.team_season_stats.len()
    }

    fn contains(&self, key: &EntityKey) -> bool {
        match key {
            EntityKey::Season(season) => self.seasons.contains(season),
            EntityKey::League(code) => self.leagues.contains_key(code),
            EntityKey::Team(id) => self.teams.contains_key(id),
            EntityKey::TeamLeagueInfo { team_id, league_id } => {
                self.team_league_info.contains_key(&(*team_id, *league_id))
            }
            EntityKey::Game(id) => self.games.contains_key(id),
            EntityKey::GameTeamScore { game_id, is_home } => {
                self.game_team_scores.contains_key(&(*game_id, *is_home))
            }
            EntityKey::Player(id) => self.players.contains_key(id),
            EntityKey::PlayerTeamSeason {
                player_id,
                team_id,
                season,
                league_code,
            } => self
                .player_team_seasons
                .contains_key(&(*player_id, *team_id, *season, league_code.clone())),
            EntityKey::PlayerGameStats {
                game_id,
                player_id,
                team_id,
            } => self
                .player_game_stats
                .contains_key(&(*game_id, *player_id, *team_id)),
            EntityKey::TeamSeasonStats { team_id, season } => {
                self.team_season_stats.contains_key(&(*team_id, *season))
            }
        }
    }

    fn require(&self, key: EntityKey, child: &EntityKey) -> anyhow::Result<()> {
        if !self.contains(&key) {
            bail!("foreign key violation: {child} references missing {key}");
        }
        Ok(())
    }

    fn require_league_id(&self, league_id: i32, child: &EntityKey) -> anyhow::Result<()> {
        if !self.leagues.values().any(|l| l.id == league_id) {
            bail!("foreign key violation: {child} references missing league #{league_id}");
        }
        Ok(())
    }

    fn apply(&mut self, row: NewRow) -> anyhow::Result<()> {
        let key = row.key();
        if self.contains(&key) {
            bail!("duplicate key violation: {key}");
        }
        match row {
            NewRow::Season(season) => {
                self.seasons.insert(season.season);
            }
            NewRow::League(league) => {
                self.next_league_id += 1;
                self.leagues.insert(
                    league.code.clone(),
                    StoredLeague {
                        id: self.next_league_id,
                        code: league.code,
                        description: league.description,
                    },
                );
            }
            NewRow::Team(team) => {
                self.teams.insert(team.id, team);
            }
            NewRow::TeamLeagueInfo(info) => {
                self.require(EntityKey::Team(info.team_id), &key)?;
                self.require_league_id(info.league_id, &key)?;
                self.team_league_info
                    .insert((info.team_id, info.league_id), info);
            }
            NewRow::Game(game) => {
                if game.home_team_id == game.away_team_id {
                    bail!("check violation: {key} has the same home and away team");
                }
                self.require(EntityKey::Season(game.season), &key)?;
                self.require(EntityKey::Team(game.home_team_id), &key)?;
                self.require(EntityKey::Team(game.away_team_id), &key)?;
                self.games.insert(game.id, game);
            }
            NewRow::GameTeamScore(score) => {
                self.require(EntityKey::Game(score.game_id), &key)?;
                self.require(EntityKey::Team(score.team_id), &key)?;
                self.game_team_scores
                    .insert((score.game_id, score.is_home), score);
            }
            NewRow::Player(player) => {
                self.players.insert(player.id, player);
            }
            NewRow::PlayerTeamSeason(pts) => {
                self.require(EntityKey::Player(pts.player_id), &key)?;
                self.require(EntityKey::Team(pts.team_id), &key)?;
                self.require(EntityKey::Season(pts.season), &key)?;
                self.player_team_seasons.insert(
                    (pts.player_id, pts.team_id, pts.season, pts.league_code.clone()),
                    pts,
                );
            }
            NewRow::PlayerGameStats(stats) => {
                self.require(EntityKey::Player(stats.player_id), &key)?;
                self.require(EntityKey::Game(stats.game_id), &key)?;
                self.require(EntityKey::Team(stats.team_id), &key)?;
                if let Some(season) = stats.season {
                    self.require(EntityKey::Season(season), &key)?;
                }
                self.player_game_stats
                    .insert((stats.game_id, stats.player_id, stats.team_id), stats);
            }
            NewRow::TeamSeasonStats(stats) => {
                self.require(EntityKey::Team(stats.team_id), &key)?;
                self.require(EntityKey::Season(stats.season), &key)?;
                self.team_season_stats
                    .insert((stats.team_id, stats.season), stats);
            }
        }
        Ok(())
    }
}

/// Process-local store with the same unit-of-work semantics as [`PgStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn UnitOfWork>> {
        let working = self.state.lock().await.clone();
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.state),
            working,
        }))
    }
}

pub struct MemoryUnitOfWork {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn exists(&mut self, key: &EntityKey) -> anyhow::Result<bool> {
        Ok(self.working.contains(key))
    }

    async fn insert(&mut self, row: NewRow) -> anyhow::Result<()> {
        self.working.apply(row)
    }

    async fn league_id(&mut self, code: &str) -> anyhow::Result<Option<i32>> {
        Ok(self.working.leagues.get(code).map(|l| l.id))
    }

    async fn game_season(&mut self, game_id: i32) -> anyhow::Result<Option<i32>> {
        Ok(self.working.games.get(&game_id).map(|g| g.season))
    }

    async fn team_ids(&mut self) -> anyhow::Result<Vec<i32>> {
        Ok(self.working.teams.keys().copied().collect())
    }

    async fn game_ids(&mut self, season: i32, team_id: Option<i32>) -> anyhow::Result<Vec<i32>> {
        let mut games = self
            .working
            .games
            .values()
            .filter(|g| g.season == season)
            .filter(|g| match team_id {
                Some(team) => g.home_team_id == team || g.away_team_id == team,
                None => true,
            })
            .map(|g| (g.date_start, g.id))
            .collect::<Vec<_>>();
        games.sort();
        Ok(games.into_iter().map(|(_, id)| id).collect())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let this = *self;
        *this.shared.lock().await = this.working;
        debug!("memory unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        debug!("memory unit of work rolled back");
        Ok(())
    }
}
