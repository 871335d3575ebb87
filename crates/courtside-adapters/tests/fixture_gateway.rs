use std::path::{Path, PathBuf};

use courtside_adapters::{FixtureGateway, GatewayError, Resource, SourceGateway};
use courtside_core::{norm_i32, norm_str, FetchScope};

fn sample_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample")
}

#[tokio::test]
async fn seasons_and_leagues_decode_from_sample_fixtures() {
    let gateway = FixtureGateway::new(sample_dir());

    let seasons = gateway.fetch_seasons().await.unwrap();
    let years: Vec<_> = seasons.iter().filter_map(|s| s.year()).collect();
    assert_eq!(years, vec![2021, 2022, 2023]);

    let leagues = gateway.fetch_leagues().await.unwrap();
    assert_eq!(leagues.len(), 6);
    assert!(leagues
        .iter()
        .any(|league| league.code().as_deref() == Some("standard")));
}

#[tokio::test]
async fn scoped_fixture_files_are_selected_by_query() {
    let gateway = FixtureGateway::new(sample_dir());

    let lakers = gateway
        .fetch_players(&FetchScope::for_season(2023).with_team(Some(17)))
        .await
        .unwrap();
    assert_eq!(lakers.len(), 3);
    assert_eq!(norm_i32(&lakers[0].id), Some(265));

    let hawks = gateway
        .fetch_players(&FetchScope::for_season(2023).with_team(Some(1)))
        .await
        .unwrap();
    assert_eq!(hawks.len(), 1);

    let nobody = gateway
        .fetch_players(&FetchScope::for_season(2023).with_team(Some(2)))
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

#[tokio::test]
async fn games_fixture_exposes_nested_scoreboards() {
    let gateway = FixtureGateway::new(sample_dir());
    let games = gateway
        .fetch_games(&FetchScope::for_season(2023))
        .await
        .unwrap();
    assert_eq!(games.len(), 3);

    let opener = &games[0];
    assert_eq!(opener.key(), Some(10403));
    assert_eq!(norm_i32(&opener.teams.home.id), Some(17));
    assert_eq!(norm_i32(&opener.teams.visitors.id), Some(1));
    let quarters: Vec<_> = (0..4).map(|q| opener.scores.home.quarter(q)).collect();
    assert_eq!(quarters, vec![Some(30), Some(25), Some(20), Some(22)]);
    assert_eq!(norm_str(&opener.status.long).as_deref(), Some("Finished"));

    let short_linescore = &games[2].scores.visitors;
    assert_eq!(short_linescore.quarter(1), Some(31));
    assert_eq!(short_linescore.quarter(2), None);
}

#[tokio::test]
async fn missing_fixture_is_no_data() {
    let gateway = FixtureGateway::new(sample_dir());
    let stats = gateway
        .fetch_player_statistics(&FetchScope::for_game(1))
        .await
        .unwrap();
    assert!(stats.is_empty());
}

#[tokio::test]
async fn upstream_errors_in_a_fixture_surface_as_gateway_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("teams.json"),
        r#"{"errors":{"requests":"You have reached the request limit for the day"},"response":[]}"#,
    )
    .unwrap();

    let gateway = FixtureGateway::new(dir.path());
    let err = gateway
        .fetch_raw(Resource::Teams, &FetchScope::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Upstream { .. }));
}
