//! Remote store against a mock record API.

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ties_core::{EdgeStore, PersistenceError, RemoteConfig, RemoteStore, SignalSource};
use ties_events::{PairKey, ProvenanceTags, RelationshipEdge};

fn store(server: &MockServer) -> RemoteStore {
    let config = RemoteConfig {
        endpoint: server.uri(),
        api_key: Some("test-key".into()),
        base_id: Some("appTest".into()),
        max_requests_per_second: 1000.0,
        ..RemoteConfig::default()
    };
    RemoteStore::new(&config).unwrap()
}

fn edge(strength: f64, trust: f64) -> RelationshipEdge {
    RelationshipEdge::new(
        PairKey::new("alice", "bob").unwrap(),
        strength,
        trust,
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
        ProvenanceTags::from_iter(["messaging"]),
    )
}

async fn no_relationship_rows(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/appTest/RELATIONSHIPS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_citizens_follow_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appTest/CITIZENS"))
        .and(header("authorization", "Bearer test-key"))
        .and(query_param("pageSize", "100"))
        .and(query_param_is_missing("offset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                { "id": "rec1", "fields": { "Username": "alice", "GuildId": "glassmakers" } },
                { "id": "rec2", "fields": { "Username": "bob" } }
            ],
            "offset": "itrPage2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appTest/CITIZENS"))
        .and(query_param("offset", "itrPage2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                { "id": "rec3", "fields": { "Username": "carol" } },
                { "id": "rec4", "fields": { "Ducats": 10.0 } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let citizens = store(&server).citizens().await.unwrap();

    let handles: Vec<&str> = citizens.iter().map(|c| c.handle.as_str()).collect();
    assert_eq!(handles, vec!["alice", "bob", "carol"]);
    assert_eq!(citizens[0].guild(), Some("glassmakers"));
}

#[tokio::test]
async fn test_resolve_record_missing_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appTest/CITIZENS/recMissing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "NOT_FOUND"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/appTest/CITIZENS/recAlice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "recAlice",
            "fields": { "Username": "alice" }
        })))
        .mount(&server)
        .await;

    let store = store(&server);

    assert_eq!(store.resolve_record("recMissing").await.unwrap(), None);
    assert_eq!(
        store.resolve_record("recAlice").await.unwrap().as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn test_second_upsert_patches_created_row() {
    let server = MockServer::start().await;
    no_relationship_rows(&server).await;
    Mock::given(method("POST"))
        .and(path("/appTest/RELATIONSHIPS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "recNew",
            "fields": {}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/appTest/RELATIONSHIPS/recNew"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "recNew",
            "fields": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store(&server);
    store.upsert(&edge(10.0, 55.0)).await.unwrap();
    store.upsert(&edge(20.0, 60.0)).await.unwrap();
    // Expectations are checked when the server drops.
}

#[tokio::test]
async fn test_get_maps_row_and_upsert_reuses_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/appTest/RELATIONSHIPS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{
                "id": "recRow",
                "fields": {
                    "Citizen1": "alice",
                    "Citizen2": "bob",
                    "StrengthScore": 40.0,
                    "TrustScore": 70.0,
                    "LastInteraction": "2025-06-01T12:00:00Z",
                    "Notes": "{\"version\":1,\"tags\":[\"proximity\"]}"
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/appTest/RELATIONSHIPS/recRow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "recRow",
            "fields": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store(&server);
    let key = PairKey::new("bob", "alice").unwrap();

    let stored = store.get(&key).await.unwrap().unwrap();
    assert_eq!((stored.strength, stored.trust), (40.0, 70.0));
    assert!(stored.tags.contains("proximity"));

    store.upsert(&edge(35.0, 66.0)).await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_write_error() {
    let server = MockServer::start().await;
    no_relationship_rows(&server).await;
    Mock::given(method("POST"))
        .and(path("/appTest/RELATIONSHIPS"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let err = store(&server).upsert(&edge(10.0, 55.0)).await.unwrap_err();

    match err {
        PersistenceError::Write { key, reason } => {
            assert_eq!(key, PairKey::new("alice", "bob").unwrap());
            assert!(reason.contains("500"), "{reason}");
        }
        other => panic!("expected a write error, got {other:?}"),
    }
}
