use std::path::{Path, PathBuf};
use std::sync::Arc;

use courtside_adapters::FixtureGateway;
use courtside_core::EntityKind;
use courtside_storage::MemoryStore;
use courtside_sync::{Loaders, Orchestrator, StepReport};

fn sample_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample")
}

fn orchestrator(store: &MemoryStore) -> Orchestrator {
    let gateway = Arc::new(FixtureGateway::new(sample_dir()));
    Orchestrator::new(Loaders::new(gateway, Arc::new(store.clone())))
}

#[tokio::test]
async fn full_run_over_sample_fixtures() {
    let store = MemoryStore::new();
    let summary = orchestrator(&store).run_all(2023, None, None).await.unwrap();

    assert_eq!(summary.steps.len(), 6);
    assert_eq!(summary.failed_items(), 0);
    let tallies = summary.tallies();

    assert_eq!(tallies[&EntityKind::Season].inserted, 3);
    assert_eq!(tallies[&EntityKind::League].inserted, 6);

    let teams = tallies[&EntityKind::Team];
    assert_eq!(teams.inserted, 3);
    assert_eq!(teams.malformed, 1);
    assert_eq!(tallies[&EntityKind::TeamLeagueInfo].inserted, 3);

    let players = tallies[&EntityKind::Player];
    assert_eq!(players.fetched, 4);
    assert_eq!(players.inserted, 3);
    assert_eq!(players.malformed, 1);
    assert_eq!(tallies[&EntityKind::PlayerTeamSeason].inserted, 3);

    let games = tallies[&EntityKind::Game];
    assert_eq!(games.inserted, 2);
    assert_eq!(games.malformed, 1);
    assert_eq!(tallies[&EntityKind::GameTeamScore].inserted, 4);

    let stats = tallies[&EntityKind::PlayerGameStats];
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.fk_rejected, 1);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.duplicates, 0);

    match summary.steps.last() {
        Some(StepReport::Bulk(bulk)) => assert_eq!(bulk.succeeded, vec![10403, 10405]),
        other => panic!("expected a bulk step, got {other:?}"),
    }

    let state = store.snapshot().await;
    assert!(!state.teams.contains_key(&99));
    assert!(!state.games.contains_key(&10404));

    let standard = state.leagues["standard"].id;
    let lakers = &state.team_league_info[&(17, standard)];
    assert_eq!(lakers.conference.as_deref(), Some("West"));
    assert_eq!(lakers.division.as_deref(), Some("Pacific"));
    assert_eq!(state.team_league_info.len(), 3);

    let namesake = &state.players[&266];
    assert_eq!((namesake.firstname.as_str(), namesake.lastname.as_str()), ("James", "James"));
    assert_eq!(namesake.birth_date, None);
    assert_eq!(namesake.birth_country, None);
    assert_eq!(namesake.nba_start, None);
    assert_eq!(namesake.height_meters, None);

    let trae = &state.player_team_seasons[&(101, 1, 2023, "standard".to_string())];
    assert_eq!(trae.jersey, Some(11));
    assert!(trae.active);

    let naive_start = &state.games[&10405];
    assert_eq!(naive_start.date_start.to_rfc3339(), "2023-10-26T00:00:00+00:00");
    assert_eq!(naive_start.nugget.as_deref(), Some("Opening night in Boston"));
    let short_side = &state.game_team_scores[&(10405, false)];
    assert_eq!(short_side.team_id, 1);
    assert_eq!(short_side.linescore_q2, Some(31));
    assert_eq!(short_side.linescore_q3, None);

    let lebron = &state.player_game_stats[&(10403, 265, 17)];
    assert_eq!(lebron.season, Some(2023));
    assert_eq!(lebron.line.fgp, Some(62.5));
    assert_eq!(lebron.line.plus_minus, Some(-17));
    let trae_line = &state.player_game_stats[&(10403, 101, 1)];
    assert_eq!(trae_line.line.plus_minus, Some(17));
    assert_eq!(trae_line.comment, None);
}

#[tokio::test]
async fn second_run_inserts_nothing() {
    let store = MemoryStore::new();
    let orchestrator = orchestrator(&store);
    orchestrator.run_all(2023, None, None).await.unwrap();
    let rows_after_first = store.snapshot().await.row_count();

    let rerun = orchestrator.run_all(2023, None, None).await.unwrap();
    let tallies = rerun.tallies();
    assert!(tallies.values().all(|tally| tally.inserted == 0));
    assert_eq!(tallies[&EntityKind::Team].duplicates, 3);
    assert_eq!(tallies[&EntityKind::PlayerGameStats].duplicates, 2);
    assert_eq!(tallies[&EntityKind::PlayerGameStats].fk_rejected, 1);
    assert_eq!(store.snapshot().await.row_count(), rows_after_first);
}

#[tokio::test]
async fn rosters_need_stored_teams() {
    let store = MemoryStore::new();
    let bulk = orchestrator(&store).load_team_players(2023).await.unwrap();
    assert!(bulk.succeeded.is_empty());
    assert!(bulk.failed.is_empty());
    assert_eq!(store.snapshot().await.row_count(), 0);
}

#[tokio::test]
async fn team_statistics_follow_the_stored_teams() {
    let store = MemoryStore::new();
    let orchestrator = orchestrator(&store);
    orchestrator.loaders().load_season().await.unwrap();
    orchestrator.loaders().load_teams().await.unwrap();

    let bulk = orchestrator.load_team_stats_bulk(2023).await.unwrap();
    assert_eq!(bulk.succeeded, vec![1, 2, 17]);
    assert_eq!(bulk.tally(EntityKind::TeamSeasonStats).inserted, 1);

    let state = store.snapshot().await;
    let lakers = &state.team_season_stats[&(17, 2023)];
    assert_eq!(lakers.games, Some(82));
    assert_eq!(lakers.fast_break_points, Some(1265));
    assert_eq!(lakers.line.tot_reb, Some(3642));
    assert_eq!(lakers.line.ftp, Some(78.4));
}
