//! Stats export and record expiry sweep.

mod common;

use actix_web::http::StatusCode;
use chrono::{Duration, Utc};

use common::{app, get, harness, join_record, queued_player, seed_join, seed_player};
use rallypoint::model::{JoinRecord, Player, ServerStats};
use rallypoint::store::{put_entity, query_all, Entity, Query};

#[actix_web::test]
async fn sweep_exports_csvs_and_expires_stale_records() {
    let h = harness();
    let app = app(&h).await;

    // Two stale players, one fresh.
    for (user, age_secs) in [("u1", 7200), ("u2", 7200), ("u3", 10)] {
        let mut player = queued_player(user, &format!("tok-{user}"));
        player.check_time = Utc::now() - Duration::seconds(age_secs);
        seed_player(&h, &player).await;
    }

    // Two stale na joins, one fresh eu join.
    for (user, token, age_secs) in [("u1", "j1", 120), ("u2", "j2", 120)] {
        let mut join = join_record(user, "s1", token);
        join.creation_time = Utc::now() - Duration::seconds(age_secs);
        seed_join(&h, &join).await;
    }
    let mut fresh = join_record("u3", "s1", "j3");
    fresh.region = "eu".to_string();
    seed_join(&h, &fresh).await;

    // Two fleet-pass stats rows waiting to be drained.
    for region in ["na", "eu"] {
        let row = ServerStats {
            region: region.to_string(),
            timestamp: Utc::now(),
            total_servers: 2,
            total_current_players: 5,
            total_max_players: 128,
        };
        put_entity(h.store.as_ref(), None, &row).await.unwrap();
    }

    let (status, _) = get(&app, "/stats").await;
    assert_eq!(status, StatusCode::OK);

    // Both CSVs landed under their dated names.
    let mut names = h.storage.names();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("stats/matchmaker/") && names[0].ends_with(".csv"));
    assert!(names[1].starts_with("stats/servers/") && names[1].ends_with(".csv"));

    // The matchmaker sample counts records as they were before expiry.
    let matchmaker = String::from_utf8(h.storage.get(&names[0]).unwrap()).unwrap();
    let mut lines = matchmaker.lines();
    assert_eq!(
        lines.next(),
        Some("Timestamp,TotalUsers,TotalJoinsNA,TotalJoinsEU")
    );
    let sample = lines.next().unwrap();
    let fields: Vec<&str> = sample.split(',').collect();
    assert_eq!(&fields[1..], ["3", "2", "1"]);
    assert_eq!(lines.next(), None);

    let servers = String::from_utf8(h.storage.get(&names[1]).unwrap()).unwrap();
    let mut lines = servers.lines();
    assert_eq!(
        lines.next(),
        Some("Region,Timestamp,TotalServers,TotalCurrentPlayers,TotalMaxPlayers")
    );
    assert_eq!(lines.clone().count(), 2);
    assert!(lines.all(|line| line.ends_with(",2,5,128")));

    // Stale records are gone, fresh ones remain.
    let players = query_all::<Player>(h.store.as_ref(), &Query::new(Player::KIND))
        .await
        .unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].1.user_id, "u3");

    let joins = query_all::<JoinRecord>(h.store.as_ref(), &Query::new(JoinRecord::KIND))
        .await
        .unwrap();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].1.join_token, "j3");

    // ServerStats rows were drained after export.
    let drained = query_all::<ServerStats>(h.store.as_ref(), &Query::new(ServerStats::KIND))
        .await
        .unwrap();
    assert!(drained.is_empty());
}

#[actix_web::test]
async fn sweep_on_an_empty_store_still_exports() {
    let h = harness();
    let app = app(&h).await;

    let (status, _) = get(&app, "/stats").await;
    assert_eq!(status, StatusCode::OK);

    let names = h.storage.names();
    assert_eq!(names.len(), 2);
    for name in names {
        let body = String::from_utf8(h.storage.get(&name).unwrap()).unwrap();
        assert!(body.lines().count() >= 1, "at least a header row in {name}");
    }
}
