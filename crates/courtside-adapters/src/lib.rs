//! Source gateway contract, parsed-input records and the api-sports / fixture gateways.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use courtside_core::{norm_i32, norm_str, FetchScope};
use courtside_storage::{
    BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher, ResponseArchive,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "courtside-adapters";

pub const DEFAULT_BASE_URL: &str = "https://v2.nba.api-sports.io";

/// Resource kinds served by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Seasons,
    Leagues,
    Teams,
    Players,
    Games,
    PlayerStatistics,
    TeamStatistics,
}

impl Resource {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Seasons => "seasons",
            Self::Leagues => "leagues",
            Self::Teams => "teams",
            Self::Players => "players",
            Self::Games => "games",
            Self::PlayerStatistics => "players/statistics",
            Self::TeamStatistics => "teams/statistics",
        }
    }

    /// File stem used by [`FixtureGateway`].
    pub fn fixture_stem(&self) -> String {
        self.endpoint().replace('/', "_")
    }

    // Seasons and leagues arrive as bare scalars.
    fn object_records(&self) -> bool {
        !matches!(self, Self::Seasons | Self::Leagues)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("upstream reported errors for {endpoint}: {detail}")]
    Upstream { endpoint: String, detail: String },
    #[error("undecodable body from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fixture {path}: {message}")]
    Fixture { path: String, message: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Nested values that are missing, null or of the wrong shape become `T::default()`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Per-league entry of a team or player (`leagues.standard`, `leagues.vegas`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLeagueEntry {
    #[serde(default)]
    pub code: JsonValue,
    #[serde(default)]
    pub conference: JsonValue,
    #[serde(default)]
    pub division: JsonValue,
    #[serde(default)]
    pub jersey: JsonValue,
    #[serde(default)]
    pub active: JsonValue,
    #[serde(default)]
    pub pos: JsonValue,
}

fn league_entry(leagues: &Map<String, JsonValue>, key: &str) -> Option<RawLeagueEntry> {
    leagues
        .get(key)
        .filter(|value| value.is_object())
        .map(|value| RawLeagueEntry::deserialize(value.clone()).unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct RawSeason(pub JsonValue);

impl RawSeason {
    pub fn year(&self) -> Option<i32> {
        norm_i32(&self.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLeagueObject {
    #[serde(default)]
    pub code: JsonValue,
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub name: JsonValue,
}

/// League items are either bare codes or objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLeague {
    Code(String),
    Entry(RawLeagueObject),
}

impl RawLeague {
    /// `code`, then `id`, then `name`.
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Code(code) => norm_str(&JsonValue::String(code.clone())),
            Self::Entry(entry) => norm_str(&entry.code)
                .or_else(|| norm_str(&entry.id))
                .or_else(|| norm_str(&entry.name)),
        }
    }

    /// `name`, then `code`, then `id`.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::Code(code) => norm_str(&JsonValue::String(code.clone())),
            Self::Entry(entry) => norm_str(&entry.name)
                .or_else(|| norm_str(&entry.code))
                .or_else(|| norm_str(&entry.id)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTeam {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub name: JsonValue,
    #[serde(default)]
    pub nickname: JsonValue,
    #[serde(default)]
    pub code: JsonValue,
    #[serde(default)]
    pub city: JsonValue,
    #[serde(default)]
    pub logo: JsonValue,
    #[serde(default, alias = "allStar")]
    pub all_star: JsonValue,
    #[serde(default, alias = "nbaFranchise")]
    pub nba_franchise: JsonValue,
    #[serde(default, deserialize_with = "lenient")]
    pub leagues: Map<String, JsonValue>,
}

impl RawTeam {
    pub fn league(&self, key: &str) -> Option<RawLeagueEntry> {
        league_entry(&self.leagues, key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBirth {
    #[serde(default)]
    pub date: JsonValue,
    #[serde(default)]
    pub country: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCareer {
    #[serde(default)]
    pub start: JsonValue,
    #[serde(default)]
    pub pro: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHeight {
    #[serde(default, alias = "feet")]
    pub feets: JsonValue,
    #[serde(default)]
    pub inches: JsonValue,
    #[serde(default)]
    pub meters: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWeight {
    #[serde(default)]
    pub pounds: JsonValue,
    #[serde(default)]
    pub kilograms: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPlayer {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub firstname: JsonValue,
    #[serde(default)]
    pub lastname: JsonValue,
    #[serde(default, deserialize_with = "lenient")]
    pub birth: RawBirth,
    #[serde(default, deserialize_with = "lenient")]
    pub nba: RawCareer,
    #[serde(default, deserialize_with = "lenient")]
    pub height: RawHeight,
    #[serde(default, deserialize_with = "lenient")]
    pub weight: RawWeight,
    #[serde(default)]
    pub college: JsonValue,
    #[serde(default)]
    pub affiliation: JsonValue,
    #[serde(default, deserialize_with = "lenient")]
    pub leagues: Map<String, JsonValue>,
}

impl RawPlayer {
    pub fn league(&self, key: &str) -> Option<RawLeagueEntry> {
        league_entry(&self.leagues, key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGameDate {
    #[serde(default)]
    pub start: JsonValue,
    #[serde(default)]
    pub end: JsonValue,
    #[serde(default)]
    pub duration: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGameStatus {
    #[serde(default)]
    pub short: JsonValue,
    #[serde(default)]
    pub long: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPeriods {
    #[serde(default)]
    pub current: JsonValue,
    #[serde(default)]
    pub total: JsonValue,
    #[serde(default, rename = "endOfPeriod")]
    pub end_of_period: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawArena {
    #[serde(default)]
    pub name: JsonValue,
    #[serde(default)]
    pub city: JsonValue,
    #[serde(default)]
    pub state: JsonValue,
    #[serde(default)]
    pub country: JsonValue,
}

/// Reference to a team, player or game nested inside another record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRef {
    #[serde(default)]
    pub id: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGameTeams {
    #[serde(default, deserialize_with = "lenient")]
    pub home: RawRef,
    #[serde(default, deserialize_with = "lenient")]
    pub visitors: RawRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSeries {
    #[serde(default)]
    pub win: JsonValue,
    #[serde(default)]
    pub loss: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScore {
    #[serde(default)]
    pub win: JsonValue,
    #[serde(default)]
    pub loss: JsonValue,
    #[serde(default, deserialize_with = "lenient")]
    pub series: RawSeries,
    #[serde(default, alias = "line_score", deserialize_with = "lenient")]
    pub linescore: Vec<JsonValue>,
    #[serde(default)]
    pub points: JsonValue,
}

impl RawScore {
    /// Points of quarter `index` (0-based); absent entries are `None`.
    pub fn quarter(&self, index: usize) -> Option<i32> {
        self.linescore.get(index).and_then(norm_i32)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGameScores {
    #[serde(default, deserialize_with = "lenient")]
    pub home: RawScore,
    #[serde(default, deserialize_with = "lenient")]
    pub visitors: RawScore,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGame {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default, rename = "gameId")]
    pub game_id: JsonValue,
    #[serde(default)]
    pub league: JsonValue,
    #[serde(default)]
    pub season: JsonValue,
    #[serde(default, deserialize_with = "lenient")]
    pub date: RawGameDate,
    #[serde(default)]
    pub stage: JsonValue,
    #[serde(default, deserialize_with = "lenient")]
    pub status: RawGameStatus,
    #[serde(default, deserialize_with = "lenient")]
    pub periods: RawPeriods,
    #[serde(default, deserialize_with = "lenient")]
    pub arena: RawArena,
    #[serde(default, deserialize_with = "lenient")]
    pub teams: RawGameTeams,
    #[serde(default, deserialize_with = "lenient")]
    pub scores: RawGameScores,
    #[serde(default, rename = "timesTied")]
    pub times_tied: JsonValue,
    #[serde(default, rename = "leadChanges")]
    pub lead_changes: JsonValue,
    #[serde(default)]
    pub nugget: JsonValue,
}

impl RawGame {
    /// `id`, falling back to `gameId`.
    pub fn key(&self) -> Option<i32> {
        norm_i32(&self.id).or_else(|| norm_i32(&self.game_id))
    }
}

/// Box-score columns shared by player and team statistics.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatLine {
    #[serde(default)]
    pub points: JsonValue,
    #[serde(default)]
    pub fgm: JsonValue,
    #[serde(default)]
    pub fga: JsonValue,
    #[serde(default)]
    pub fgp: JsonValue,
    #[serde(default)]
    pub ftm: JsonValue,
    #[serde(default)]
    pub fta: JsonValue,
    #[serde(default)]
    pub ftp: JsonValue,
    #[serde(default)]
    pub tpm: JsonValue,
    #[serde(default)]
    pub tpa: JsonValue,
    #[serde(default)]
    pub tpp: JsonValue,
    #[serde(default)]
    pub off_reb: JsonValue,
    #[serde(default)]
    pub def_reb: JsonValue,
    #[serde(default)]
    pub tot_reb: JsonValue,
    #[serde(default)]
    pub assists: JsonValue,
    #[serde(default)]
    pub p_fouls: JsonValue,
    #[serde(default)]
    pub steals: JsonValue,
    #[serde(default)]
    pub turnovers: JsonValue,
    #[serde(default)]
    pub blocks: JsonValue,
    #[serde(default)]
    pub plus_minus: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPlayerStats {
    #[serde(default, deserialize_with = "lenient")]
    pub player: RawRef,
    #[serde(default, deserialize_with = "lenient")]
    pub team: RawRef,
    #[serde(default, deserialize_with = "lenient")]
    pub game: RawRef,
    #[serde(default)]
    pub pos: JsonValue,
    #[serde(default)]
    pub min: JsonValue,
    #[serde(default)]
    pub comment: JsonValue,
    #[serde(flatten)]
    pub line: RawStatLine,
}

/// One season aggregate from `teams/statistics`; the team comes from the request scope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTeamStats {
    #[serde(default)]
    pub games: JsonValue,
    #[serde(default)]
    pub fast_break_points: JsonValue,
    #[serde(default)]
    pub points_in_paint: JsonValue,
    #[serde(default)]
    pub biggest_lead: JsonValue,
    #[serde(default)]
    pub second_chance_points: JsonValue,
    #[serde(default)]
    pub points_off_turnovers: JsonValue,
    #[serde(default)]
    pub longest_run: JsonValue,
    #[serde(flatten)]
    pub line: RawStatLine,
}

fn reports_errors(errors: &JsonValue) -> bool {
    match errors {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(_) => true,
        JsonValue::String(text) => !text.trim().is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Unwraps `{ "response": [...], "errors": ... }`; a bare array is accepted as-is.
pub fn parse_envelope(endpoint: &str, body: &[u8]) -> Result<Vec<JsonValue>, GatewayError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|source| GatewayError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })?;

    let mut envelope = match value {
        JsonValue::Array(items) => return Ok(items),
        JsonValue::Object(map) => map,
        other => {
            return Err(GatewayError::Upstream {
                endpoint: endpoint.to_string(),
                detail: format!("unexpected body {other}"),
            })
        }
    };

    if let Some(errors) = envelope.get("errors").filter(|errors| reports_errors(errors)) {
        return Err(GatewayError::Upstream {
            endpoint: endpoint.to_string(),
            detail: errors.to_string(),
        });
    }

    match envelope.remove("response") {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => Ok(items),
        Some(JsonValue::Object(map)) if map.is_empty() => Ok(Vec::new()),
        Some(single @ JsonValue::Object(_)) => Ok(vec![single]),
        Some(other) => Err(GatewayError::Upstream {
            endpoint: endpoint.to_string(),
            detail: format!("unexpected response member {other}"),
        }),
    }
}

/// Decodes raw items into `T`, dropping (and logging) those that do not fit.
pub fn decode_records<T: DeserializeOwned>(resource: Resource, items: Vec<JsonValue>) -> Vec<T> {
    let endpoint = resource.endpoint();
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            if resource.object_records() && !item.is_object() {
                warn!(endpoint, index, record = %item, "dropping non-object record");
                return None;
            }
            match T::deserialize(item) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(endpoint, index, error = %err, "dropping undecodable record");
                    None
                }
            }
        })
        .collect()
}

/// An empty `Ok` means "no data"; `Err` is an upstream failure the caller logs.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    fn gateway_id(&self) -> &'static str;

    async fn fetch_raw(
        &self,
        resource: Resource,
        scope: &FetchScope,
    ) -> Result<Vec<JsonValue>, GatewayError>;

    async fn fetch_seasons(&self) -> Result<Vec<RawSeason>, GatewayError> {
        let items = self
            .fetch_raw(Resource::Seasons, &FetchScope::default())
            .await?;
        Ok(decode_records(Resource::Seasons, items))
    }

    async fn fetch_leagues(&self) -> Result<Vec<RawLeague>, GatewayError> {
        let items = self
            .fetch_raw(Resource::Leagues, &FetchScope::default())
            .await?;
        Ok(decode_records(Resource::Leagues, items))
    }

    async fn fetch_teams(&self, scope: &FetchScope) -> Result<Vec<RawTeam>, GatewayError> {
        let items = self.fetch_raw(Resource::Teams, scope).await?;
        Ok(decode_records(Resource::Teams, items))
    }

    async fn fetch_players(&self, scope: &FetchScope) -> Result<Vec<RawPlayer>, GatewayError> {
        let items = self.fetch_raw(Resource::Players, scope).await?;
        Ok(decode_records(Resource::Players, items))
    }

    async fn fetch_games(&self, scope: &FetchScope) -> Result<Vec<RawGame>, GatewayError> {
        let items = self.fetch_raw(Resource::Games, scope).await?;
        Ok(decode_records(Resource::Games, items))
    }

    async fn fetch_player_statistics(
        &self,
        scope: &FetchScope,
    ) -> Result<Vec<RawPlayerStats>, GatewayError> {
        let items = self.fetch_raw(Resource::PlayerStatistics, scope).await?;
        Ok(decode_records(Resource::PlayerStatistics, items))
    }

    async fn fetch_team_statistics(
        &self,
        scope: &FetchScope,
    ) -> Result<Vec<RawTeamStats>, GatewayError> {
        let items = self.fetch_raw(Resource::TeamStatistics, scope).await?;
        Ok(decode_records(Resource::TeamStatistics, items))
    }
}

#[derive(Debug, Clone)]
pub struct ApiSportsConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub requests_per_minute: Option<u32>,
    pub archive_dir: Option<PathBuf>,
}

impl Default for ApiSportsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            requests_per_minute: None,
            archive_dir: None,
        }
    }
}

impl ApiSportsConfig {
    /// Value of the `x-rapidapi-host` header.
    pub fn host(&self) -> &str {
        self.base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }
}

#[derive(Debug)]
pub struct ApiSportsGateway {
    base_url: String,
    http: HttpFetcher,
    archive: Option<ResponseArchive>,
}

impl ApiSportsGateway {
    pub fn new(config: ApiSportsConfig) -> Result<Self, GatewayError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.timeout,
            user_agent: Some(format!("courtside/{}", env!("CARGO_PKG_VERSION"))),
            default_headers: vec![
                ("x-rapidapi-key".to_string(), config.api_key.clone()),
                ("x-rapidapi-host".to_string(), config.host().to_string()),
            ],
            backoff: BackoffPolicy {
                max_retries: config.max_retries,
                ..BackoffPolicy::default()
            },
            requests_per_minute: config.requests_per_minute,
        })?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            archive: config.archive_dir.map(ResponseArchive::new),
        })
    }

    pub fn url_for(&self, resource: Resource) -> String {
        format!("{}/{}", self.base_url, resource.endpoint())
    }
}

/// Query parameters as the HTTP API names them; `teams/statistics` calls the team `id`.
pub fn upstream_query(resource: Resource, scope: &FetchScope) -> Vec<(&'static str, String)> {
    scope
        .query_pairs()
        .into_iter()
        .map(|(name, value)| match (resource, name) {
            (Resource::TeamStatistics, "team") => ("id", value),
            _ => (name, value),
        })
        .collect()
}

#[async_trait]
impl SourceGateway for ApiSportsGateway {
    fn gateway_id(&self) -> &'static str {
        "api-sports"
    }

    async fn fetch_raw(
        &self,
        resource: Resource,
        scope: &FetchScope,
    ) -> Result<Vec<JsonValue>, GatewayError> {
        let url = self.url_for(resource);
        let query = upstream_query(resource, scope);
        let response = self.http.get(&url, &query).await?;

        if let Some(archive) = &self.archive {
            match archive
                .store_body(response.fetched_at, resource.endpoint(), &response.body)
                .await
            {
                Ok(stored) => debug!(
                    path = %stored.relative_path.display(),
                    deduplicated = stored.deduplicated,
                    "archived raw response"
                ),
                Err(err) => warn!(error = %err, endpoint = resource.endpoint(), "raw response archive failed"),
            }
        }

        let items = parse_envelope(resource.endpoint(), &response.body)?;
        info!(
            endpoint = resource.endpoint(),
            status = response.status.as_u16(),
            records = items.len(),
            "fetched upstream records"
        );
        Ok(items)
    }
}

/// Serves recorded responses from `<root>/<resource>.json`.
///
/// A scope-specific file such as `players.season-2023.team-1.json` wins over
/// the plain one, so one directory can hold per-team or per-game captures.
#[derive(Debug, Clone)]
pub struct FixtureGateway {
    root: PathBuf,
}

impl FixtureGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn candidate_paths(&self, resource: Resource, scope: &FetchScope) -> Vec<PathBuf> {
        let stem = resource.fixture_stem();
        let pairs = scope.query_pairs();
        let mut candidates = Vec::with_capacity(2);
        if !pairs.is_empty() {
            let qualifier = pairs
                .iter()
                .map(|(name, value)| format!("{name}-{value}"))
                .collect::<Vec<_>>()
                .join(".");
            candidates.push(self.root.join(format!("{stem}.{qualifier}.json")));
        }
        candidates.push(self.root.join(format!("{stem}.json")));
        candidates
    }
}

#[async_trait]
impl SourceGateway for FixtureGateway {
    fn gateway_id(&self) -> &'static str {
        "fixtures"
    }

    async fn fetch_raw(
        &self,
        resource: Resource,
        scope: &FetchScope,
    ) -> Result<Vec<JsonValue>, GatewayError> {
        let Some(path) = self
            .candidate_paths(resource, scope)
            .into_iter()
            .find(|path| path.is_file())
        else {
            debug!(endpoint = resource.endpoint(), root = %self.root.display(), "no fixture file");
            return Ok(Vec::new());
        };

        let body = fs::read(&path).map_err(|err| GatewayError::Fixture {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let items = parse_envelope(resource.endpoint(), &body)?;
        debug!(path = %path.display(), records = items.len(), "served fixture records");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_errors_are_upstream_failures() {
        let body = br#"{"errors":{"token":"Error/Missing application key."},"response":[]}"#;
        let err = parse_envelope("teams", body).unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { .. }));

        let empty_errors = br#"{"errors":[],"results":2,"response":[1,2]}"#;
        assert_eq!(parse_envelope("seasons", empty_errors).unwrap().len(), 2);
    }

    #[test]
    fn missing_or_null_response_is_no_data() {
        assert!(parse_envelope("games", br#"{"errors":[]}"#).unwrap().is_empty());
        assert!(parse_envelope("games", br#"{"response":null}"#)
            .unwrap()
            .is_empty());
        assert!(parse_envelope("games", b"[]").unwrap().is_empty());
        assert!(matches!(
            parse_envelope("games", b"not json"),
            Err(GatewayError::Decode { .. })
        ));
    }

    #[test]
    fn single_object_response_becomes_one_record() {
        let body = br#"{"errors":[],"response":{"games":82,"points":9000}}"#;
        let items = parse_envelope("teams/statistics", body).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn league_items_fall_back_through_code_id_and_name() {
        let leagues: Vec<RawLeague> = decode_records(
            Resource::Leagues,
            vec![
                json!("standard"),
                json!({"id": 12, "name": "Vegas"}),
                json!({"name": "Utah"}),
                json!({"code": " - "}),
                json!(7),
            ],
        );
        assert_eq!(leagues.len(), 4);
        assert_eq!(leagues[0].code().as_deref(), Some("standard"));
        assert_eq!(leagues[0].description().as_deref(), Some("standard"));
        assert_eq!(leagues[1].code().as_deref(), Some("12"));
        assert_eq!(leagues[1].description().as_deref(), Some("Vegas"));
        assert_eq!(leagues[2].code().as_deref(), Some("Utah"));
        assert_eq!(leagues[3].code(), None);
    }

    #[test]
    fn wrongly_shaped_nested_values_become_empty_objects() {
        let games: Vec<RawGame> = decode_records(
            Resource::Games,
            vec![json!({
                "gameId": 77,
                "date": "2024-01-01",
                "status": null,
                "teams": {"home": {"id": 1}, "visitors": []},
                "scores": {"home": {"line_score": ["30", 25, "", null]}}
            })],
        );
        let game = &games[0];
        assert_eq!(game.key(), Some(77));
        assert_eq!(game.date.start, JsonValue::Null);
        assert_eq!(norm_i32(&game.teams.home.id), Some(1));
        assert_eq!(game.teams.visitors.id, JsonValue::Null);
        assert_eq!(game.scores.home.quarter(0), Some(30));
        assert_eq!(game.scores.home.quarter(1), Some(25));
        assert_eq!(game.scores.home.quarter(2), None);
        assert_eq!(game.scores.home.quarter(7), None);
        assert!(game.scores.visitors.linescore.is_empty());
    }

    #[test]
    fn non_object_records_are_dropped() {
        let teams: Vec<RawTeam> = decode_records(
            Resource::Teams,
            vec![json!("lakers"), json!({"id": 14, "name": "Lakers", "allStar": false})],
        );
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].all_star, json!(false));
    }

    #[test]
    fn league_entries_are_looked_up_leniently() {
        let team: RawTeam = serde_json::from_value(json!({
            "id": 1,
            "name": "Atlanta Hawks",
            "leagues": {
                "standard": {"conference": "East", "division": "Southeast"},
                "vegas": null
            }
        }))
        .unwrap();
        let standard = team.league("standard").unwrap();
        assert_eq!(standard.conference, json!("East"));
        assert!(team.league("vegas").is_none());
        assert!(team.league("africa").is_none());

        let broken: RawTeam =
            serde_json::from_value(json!({"id": 2, "name": "X", "leagues": "none"})).unwrap();
        assert!(broken.leagues.is_empty());
    }

    #[test]
    fn stat_lines_read_camel_case_columns() {
        let stats: Vec<RawPlayerStats> = decode_records(
            Resource::PlayerStatistics,
            vec![json!({
                "player": {"id": 124, "firstname": "LeBron"},
                "team": {"id": 17},
                "game": {"id": 10403},
                "points": 25,
                "offReb": "2",
                "plusMinus": "+7",
                "fgp": "52.4"
            })],
        );
        let line = &stats[0].line;
        assert_eq!(line.points, json!(25));
        assert_eq!(line.off_reb, json!("2"));
        assert_eq!(line.plus_minus, json!("+7"));
        assert_eq!(line.fgp, json!("52.4"));
    }

    #[test]
    fn rapidapi_host_strips_scheme_and_slash() {
        let config = ApiSportsConfig {
            base_url: "https://v2.nba.api-sports.io/".to_string(),
            ..ApiSportsConfig::default()
        };
        assert_eq!(config.host(), "v2.nba.api-sports.io");
    }

    #[test]
    fn team_statistics_query_names_the_team_id() {
        let scope = FetchScope::for_season(2023).with_team(Some(17));
        assert_eq!(
            upstream_query(Resource::TeamStatistics, &scope),
            vec![("season", "2023".to_string()), ("id", "17".to_string())]
        );
        assert_eq!(
            upstream_query(Resource::Players, &scope),
            vec![("season", "2023".to_string()), ("team", "17".to_string())]
        );
    }

    #[test]
    fn fixture_candidates_prefer_scoped_files() {
        let gateway = FixtureGateway::new("/data");
        let scope = FetchScope::for_season(2023).with_team(Some(1));
        let candidates = gateway.candidate_paths(Resource::Players, &scope);
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/data/players.season-2023.team-1.json"),
                PathBuf::from("/data/players.json"),
            ]
        );
        let plain = gateway.candidate_paths(Resource::PlayerStatistics, &FetchScope::default());
        assert_eq!(plain, vec![PathBuf::from("/data/players_statistics.json")]);
    }
}
