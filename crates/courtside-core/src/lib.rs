//! Core domain rows, natural keys and scalar normalization for Courtside.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "courtside-core";

/// Upstream tokens that carry no value.
pub const BLANK_TOKENS: [&str; 8] = ["", "-", "--", "—", "N/A", "NA", "null", "NULL"];

/// Entity kinds the ingestion pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Season,
    League,
    Team,
    TeamLeagueInfo,
    Game,
    GameTeamScore,
    Player,
    PlayerTeamSeason,
    PlayerGameStats,
    TeamSeasonStats,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Season => "season",
            Self::League => "league",
            Self::Team => "team",
            Self::TeamLeagueInfo => "team_league_info",
            Self::Game => "game",
            Self::GameTeamScore => "game_team_score",
            Self::Player => "player",
            Self::PlayerTeamSeason => "player_team_season",
            Self::PlayerGameStats => "player_game_stats",
            Self::TeamSeasonStats => "team_season_stats",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a persisted row, as assigned by the upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Season(i32),
    League(String),
    Team(i32),
    TeamLeagueInfo { team_id: i32, league_id: i32 },
    Game(i32),
    GameTeamScore { game_id: i32, is_home: bool },
    Player(i32),
    PlayerTeamSeason {
        player_id: i32,
        team_id: i32,
        season: i32,
        league_code: String,
    },
    PlayerGameStats { game_id: i32, player_id: i32, team_id: i32 },
    TeamSeasonStats { team_id: i32, season: i32 },
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Season(_) => EntityKind::Season,
            Self::League(_) => EntityKind::League,
            Self::Team(_) => EntityKind::Team,
            Self::TeamLeagueInfo { .. } => EntityKind::TeamLeagueInfo,
            Self::Game(_) => EntityKind::Game,
            Self::GameTeamScore { .. } => EntityKind::GameTeamScore,
            Self::Player(_) => EntityKind::Player,
            Self::PlayerTeamSeason { .. } => EntityKind::PlayerTeamSeason,
            Self::PlayerGameStats { .. } => EntityKind::PlayerGameStats,
            Self::TeamSeasonStats { .. } => EntityKind::TeamSeasonStats,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Season(year) => write!(f, "season {year}"),
            Self::League(code) => write!(f, "league {code}"),
            Self::Team(id) => write!(f, "team {id}"),
            Self::TeamLeagueInfo { team_id, league_id } => {
                write!(f, "team {team_id} in league #{league_id}")
            }
            Self::Game(id) => write!(f, "game {id}"),
            Self::GameTeamScore { game_id, is_home } => {
                let side = if *is_home { "home" } else { "away" };
                write!(f, "{side} score of game {game_id}")
            }
            Self::Player(id) => write!(f, "player {id}"),
            Self::PlayerTeamSeason {
                player_id,
                team_id,
                season,
                league_code,
            } => write!(
                f,
                "player {player_id} on team {team_id} in {season} ({league_code})"
            ),
            Self::PlayerGameStats {
                game_id,
                player_id,
                team_id,
            } => write!(f, "stats of player {player_id} (team {team_id}) in game {game_id}"),
            Self::TeamSeasonStats { team_id, season } => {
                write!(f, "stats of team {team_id} in {season}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub season: i32,
}

/// League row before the store assigns its surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLeague {
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: i32,
    pub name: String,
    pub nickname: Option<String>,
    pub code: Option<String>,
    pub city: Option<String>,
    pub logo: Option<String>,
    pub all_star: bool,
    pub nba_franchise: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLeagueInfo {
    pub team_id: i32,
    pub league_id: i32,
    pub conference: Option<String>,
    pub division: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: i32,
    pub league: Option<String>,
    pub season: i32,
    pub date_start: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub stage: Option<i32>,
    pub status_short: Option<i32>,
    pub status_long: Option<String>,
    pub periods_current: Option<i32>,
    pub periods_total: Option<i32>,
    pub periods_end_of_period: Option<bool>,
    pub arena_name: Option<String>,
    pub arena_city: Option<String>,
    pub arena_state: Option<String>,
    pub arena_country: Option<String>,
    pub times_tied: Option<i32>,
    pub lead_changes: Option<i32>,
    pub nugget: Option<String>,
    pub home_team_id: i32,
    pub away_team_id: i32,
}

/// One side of a game's scoreboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameTeamScore {
    pub game_id: i32,
    pub team_id: i32,
    pub is_home: bool,
    pub win: Option<i32>,
    pub loss: Option<i32>,
    pub series_win: Option<i32>,
    pub series_loss: Option<i32>,
    pub points: Option<i32>,
    pub linescore_q1: Option<i32>,
    pub linescore_q2: Option<i32>,
    pub linescore_q3: Option<i32>,
    pub linescore_q4: Option<i32>,
}

/// Box-score columns shared by player and team aggregates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatLine {
    pub points: Option<i32>,
    pub fgm: Option<i32>,
    pub fga: Option<i32>,
    pub fgp: Option<f64>,
    pub ftm: Option<i32>,
    pub fta: Option<i32>,
    pub ftp: Option<f64>,
    pub tpm: Option<i32>,
    pub tpa: Option<i32>,
    pub tpp: Option<f64>,
    pub off_reb: Option<i32>,
    pub def_reb: Option<i32>,
    pub tot_reb: Option<i32>,
    pub assists: Option<i32>,
    pub p_fouls: Option<i32>,
    pub steals: Option<i32>,
    pub turnovers: Option<i32>,
    pub blocks: Option<i32>,
    pub plus_minus: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonStats {
    pub team_id: i32,
    pub season: i32,
    pub games: Option<i32>,
    pub fast_break_points: Option<i32>,
    pub points_in_paint: Option<i32>,
    pub biggest_lead: Option<i32>,
    pub second_chance_points: Option<i32>,
    pub points_off_turnovers: Option<i32>,
    pub longest_run: Option<i32>,
    pub line: StatLine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: i32,
    pub firstname: String,
    pub lastname: String,
    pub birth_date: Option<NaiveDate>,
    pub birth_country: Option<String>,
    pub nba_start: Option<i32>,
    pub nba_pro: Option<i32>,
    pub height_feet: Option<i32>,
    pub height_inches: Option<i32>,
    pub height_meters: Option<f64>,
    pub weight_pounds: Option<i32>,
    pub weight_kilograms: Option<f64>,
    pub college: Option<String>,
    pub affiliation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerTeamSeason {
    pub player_id: i32,
    pub team_id: i32,
    pub season: i32,
    pub league_code: String,
    pub jersey: Option<i32>,
    pub active: bool,
    pub pos: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerGameStats {
    pub player_id: i32,
    pub game_id: i32,
    pub team_id: i32,
    pub season: Option<i32>,
    pub pos: Option<String>,
    pub minutes: Option<String>,
    pub comment: Option<String>,
    pub line: StatLine,
}

/// A row staged for insertion into the current unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum NewRow {
    Season(Season),
    League(NewLeague),
    Team(Team),
    TeamLeagueInfo(TeamLeagueInfo),
    Game(Game),
    GameTeamScore(GameTeamScore),
    Player(Player),
    PlayerTeamSeason(PlayerTeamSeason),
    PlayerGameStats(PlayerGameStats),
    TeamSeasonStats(TeamSeasonStats),
}

impl NewRow {
    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }

    pub fn key(&self) -> EntityKey {
        match self {
            Self::Season(row) => EntityKey::Season(row.season),
            Self::League(row) => EntityKey::League(row.code.clone()),
            Self::Team(row) => EntityKey::Team(row.id),
            Self::TeamLeagueInfo(row) => EntityKey::TeamLeagueInfo {
                team_id: row.team_id,
                league_id: row.league_id,
            },
            Self::Game(row) => EntityKey::Game(row.id),
            Self::GameTeamScore(row) => EntityKey::GameTeamScore {
                game_id: row.game_id,
                is_home: row.is_home,
            },
            Self::Player(row) => EntityKey::Player(row.id),
            Self::PlayerTeamSeason(row) => EntityKey::PlayerTeamSeason {
                player_id: row.player_id,
                team_id: row.team_id,
                season: row.season,
                league_code: row.league_code.clone(),
            },
            Self::PlayerGameStats(row) => EntityKey::PlayerGameStats {
                game_id: row.game_id,
                player_id: row.player_id,
                team_id: row.team_id,
            },
            Self::TeamSeasonStats(row) => EntityKey::TeamSeasonStats {
                team_id: row.team_id,
                season: row.season,
            },
        }
    }
}

/// Optional filters applied to an upstream fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchScope {
    pub season: Option<i32>,
    pub team_id: Option<i32>,
    pub date: Option<NaiveDate>,
    pub game_id: Option<i32>,
    pub player_id: Option<i32>,
    pub league: Option<String>,
}

impl FetchScope {
    pub fn for_season(season: i32) -> Self {
        Self {
            season: Some(season),
            ..Self::default()
        }
    }

    pub fn for_game(game_id: i32) -> Self {
        Self {
            game_id: Some(game_id),
            ..Self::default()
        }
    }

    pub fn with_team(mut self, team_id: Option<i32>) -> Self {
        self.team_id = team_id;
        self
    }

    pub fn with_date(mut self, date: Option<NaiveDate>) -> Self {
        self.date = date;
        self
    }

    /// Query parameters in the upstream API's naming.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(season) = self.season {
            pairs.push(("season", season.to_string()));
        }
        if let Some(team_id) = self.team_id {
            pairs.push(("team", team_id.to_string()));
        }
        if let Some(date) = self.date {
            pairs.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(game_id) = self.game_id {
            pairs.push(("game", game_id.to_string()));
        }
        if let Some(player_id) = self.player_id {
            pairs.push(("id", player_id.to_string()));
        }
        if let Some(league) = &self.league {
            pairs.push(("league", league.clone()));
        }
        pairs
    }
}

fn is_blank(trimmed: &str) -> bool {
    BLANK_TOKENS.contains(&trimmed)
}

/// Trimmed text, or `None` for null, blank tokens, arrays and objects.
pub fn norm_str(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!is_blank(trimmed)).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Integer conversion; anything unparseable degrades to `None`.
pub fn norm_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if is_blank(trimmed) {
                None
            } else {
                trimmed.parse().ok()
            }
        }
        JsonValue::Bool(b) => Some(i64::from(*b)),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// Like [`norm_int`], but also `None` when the value overflows an INTEGER column.
pub fn norm_i32(value: &JsonValue) -> Option<i32> {
    norm_int(value).and_then(|v| i32::try_from(v).ok())
}

pub fn norm_float(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if is_blank(trimmed) {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    };
    parsed.filter(|f| f.is_finite())
}

pub fn norm_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|v| v != 0),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

/// `YYYY-MM-DD` only.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// RFC 3339 timestamps; a zone-less `YYYY-MM-DDTHH:MM:SS` is read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_tokens_normalize_to_none_with_surrounding_whitespace() {
        for token in BLANK_TOKENS {
            for padded in [token.to_string(), format!("  {token} "), format!("\t{token}\n")] {
                let raw = json!(padded);
                assert_eq!(norm_str(&raw), None, "str {padded:?}");
                assert_eq!(norm_int(&raw), None, "int {padded:?}");
                assert_eq!(norm_float(&raw), None, "float {padded:?}");
            }
        }
        assert_eq!(norm_str(&JsonValue::Null), None);
    }

    #[test]
    fn strings_are_trimmed_and_scalars_rendered() {
        assert_eq!(norm_str(&json!("  Lakers ")).as_deref(), Some("Lakers"));
        assert_eq!(norm_str(&json!(2)).as_deref(), Some("2"));
        assert_eq!(norm_str(&json!(true)).as_deref(), Some("true"));
        assert_eq!(norm_str(&json!(["a"])), None);
        assert_eq!(norm_str(&json!({"a": 1})), None);
    }

    #[test]
    fn integers_degrade_to_none_instead_of_failing() {
        assert_eq!(norm_int(&json!(" 42 ")), Some(42));
        assert_eq!(norm_int(&json!("+5")), Some(5));
        assert_eq!(norm_int(&json!("-12")), Some(-12));
        assert_eq!(norm_int(&json!(7.9)), Some(7));
        assert_eq!(norm_int(&json!("7.9")), None);
        assert_eq!(norm_int(&json!("abc")), None);
        assert_eq!(norm_int(&json!(true)), Some(1));
        assert_eq!(norm_int(&json!([1])), None);
        assert_eq!(norm_i32(&json!(5_000_000_000i64)), None);
        assert_eq!(norm_i32(&json!("31")), Some(31));
    }

    #[test]
    fn floats_parse_numbers_and_strings() {
        assert_eq!(norm_float(&json!("45.5")), Some(45.5));
        assert_eq!(norm_float(&json!(2)), Some(2.0));
        assert_eq!(norm_float(&json!("1,98")), None);
        assert_eq!(norm_float(&json!("NaN")), None);
        assert_eq!(norm_float(&json!("inf")), None);
    }

    #[test]
    fn booleans_accept_literals_integers_and_words() {
        assert_eq!(norm_bool(&json!(true)), Some(true));
        assert_eq!(norm_bool(&json!(0)), Some(false));
        assert_eq!(norm_bool(&json!(3)), Some(true));
        assert_eq!(norm_bool(&json!(" YES ")), Some(true));
        assert_eq!(norm_bool(&json!("False")), Some(false));
        assert_eq!(norm_bool(&json!("no")), Some(false));
        assert_eq!(norm_bool(&json!("maybe")), None);
        assert_eq!(norm_bool(&json!(1.5)), None);
        assert_eq!(norm_bool(&JsonValue::Null), None);
    }

    #[test]
    fn dates_accept_a_single_format() {
        assert_eq!(parse_date("1984-12-30"), NaiveDate::from_ymd_opt(1984, 12, 30));
        assert_eq!(parse_date("30/12/1984"), None);
        assert_eq!(parse_date("1984-12-30T00:00:00Z"), None);
    }

    #[test]
    fn timestamps_accept_rfc3339_and_naive_fallback() {
        let zulu = parse_timestamp("2023-10-24T23:30:00.000Z").unwrap();
        assert_eq!(zulu.to_rfc3339(), "2023-10-24T23:30:00+00:00");
        let naive = parse_timestamp("2023-10-24T23:30:00").unwrap();
        assert_eq!(naive, zulu);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn scope_renders_upstream_query_names() {
        let scope = FetchScope::for_season(2023)
            .with_team(Some(14))
            .with_date(NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(
            scope.query_pairs(),
            vec![
                ("season", "2023".to_string()),
                ("team", "14".to_string()),
                ("date", "2024-01-02".to_string()),
            ]
        );
    }

    #[test]
    fn staged_rows_report_their_natural_key() {
        let row = NewRow::GameTeamScore(GameTeamScore {
            game_id: 9,
            team_id: 1,
            is_home: false,
            win: None,
            loss: None,
            series_win: None,
            series_loss: None,
            points: None,
            linescore_q1: None,
            linescore_q2: None,
            linescore_q3: None,
            linescore_q4: None,
        });
        assert_eq!(row.kind(), EntityKind::GameTeamScore);
        assert_eq!(
            row.key(),
            EntityKey::GameTeamScore {
                game_id: 9,
                is_home: false
            }
        );
        assert_eq!(row.key().to_string(), "away score of game 9");
    }
}
