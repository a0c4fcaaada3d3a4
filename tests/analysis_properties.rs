use apiscope::analysis::{analyze_batch, AnalysisOrchestrator, ReportDelta, StreamingHandle};
use apiscope::configuration::Config;
use apiscope::data_capture::{BodyStatus, CapturedExchange, CapturedResponse};
use apiscope::error_handling::AnalysisError;
use apiscope::protocol::Protocol;
use apiscope::session_management::SessionState;
use apiscope::storage::{ExchangeRepository, InMemoryRepository, JsonlRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

const HOST: &str = "api.example.com";

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
}

fn request(id: &str, minutes: i64, method: &str, path: &str) -> CapturedExchange {
    CapturedExchange::new(id, at(minutes), method, HOST, path).with_header("Authorization", "Bearer alice")
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn numeric_segments_generalize_and_deeper_paths_stay_apart() {
    init_logger();
    let exchanges = vec![
        request("1", 0, "GET", "/users/1"),
        request("2", 1, "GET", "/users/2"),
        request("3", 2, "GET", "/users/1/repos"),
    ];
    let report = analyze_batch(HOST, exchanges, &Config::default(), None);

    let templates: Vec<(&str, &str)> = report
        .endpoints
        .iter()
        .map(|e| (e.method.as_str(), e.template.as_str()))
        .collect();
    assert_eq!(templates, vec![("GET", "/users/1/repos"), ("GET", "/users/{user_id}")]);
}

#[test]
fn single_observation_stays_literal() {
    let report = analyze_batch(HOST, vec![request("1", 0, "GET", "/orders/42")], &Config::default(), None);
    assert_eq!(report.endpoints.len(), 1);
    assert_eq!(report.endpoints[0].template, "/orders/42");
    assert!(report.endpoints[0].parameters.is_empty());
}

#[test]
fn json_rpc_calls_are_grouped_not_templated() {
    let single = request("1", 0, "POST", "/rpc").with_json_body(&json!({"jsonrpc": "2.0", "method": "getUser", "id": 7}));
    let batch = request("2", 1, "POST", "/rpc").with_json_body(&json!([
        {"jsonrpc": "2.0", "method": "getUser", "id": 8},
        {"jsonrpc": "2.0", "method": "getUser", "id": 9}
    ]));
    let report = analyze_batch(HOST, vec![single, batch], &Config::default(), None);

    assert!(report.endpoints.is_empty());
    assert_eq!(report.protocols.get(&Protocol::JsonRpc), Some(&2));
    let group = report.rpc_group(Protocol::JsonRpc, "getUser").unwrap();
    assert_eq!(group.call_count, 3);
    assert_eq!(group.batch_call_count, 2);
}

#[test]
fn idle_gap_beyond_threshold_splits_sessions() {
    let split = analyze_batch(
        HOST,
        vec![request("1", 0, "GET", "/a"), request("2", 31, "GET", "/a")],
        &Config::default(),
        None,
    );
    assert_eq!(split.sessions.len(), 2);
    assert!(split.sessions.iter().all(|s| s.state == SessionState::Closed));
    assert_eq!(split.sessions[0].identity, split.sessions[1].identity);
    assert_ne!(split.sessions[0].id, split.sessions[1].id);

    let joined = analyze_batch(
        HOST,
        vec![request("1", 0, "GET", "/a"), request("2", 29, "GET", "/a")],
        &Config::default(),
        None,
    );
    assert_eq!(joined.sessions.len(), 1);
    assert_eq!(joined.sessions[0].exchange_ids, vec!["1", "2"]);
}

#[test]
fn session_ids_are_reproducible_across_runs() {
    let run = || {
        analyze_batch(
            HOST,
            vec![request("1", 0, "GET", "/a"), request("2", 45, "GET", "/a")],
            &Config::default(),
            None,
        )
    };
    let ids = |r: apiscope::AnalysisReport| r.sessions.into_iter().map(|s| s.id).collect::<Vec<_>>();
    assert_eq!(ids(run()), ids(run()));
}

#[test]
fn undecodable_body_does_not_abort_the_batch() {
    init_logger();
    let exchanges = vec![
        request("1", 0, "POST", "/upload")
            .with_header("Content-Type", "application/json")
            .with_body(vec![0xc3, 0x28, 0xff]),
        request("2", 1, "POST", "/upload").with_json_body(&json!({"name": "a.txt", "size": 3})),
        request("3", 2, "POST", "/upload").with_json_body(&json!({"name": "b.txt"})),
    ];
    let report = analyze_batch(HOST, exchanges, &Config::default(), None);

    assert_eq!(report.exchange_count, 3);
    assert_eq!(report.undecodable_exchanges, 1);
    let upload = report.endpoint("POST", "/upload").unwrap();
    assert_eq!(upload.body, BodyStatus::Undecodable);
    assert_eq!(upload.sample_count, 3);
    assert_eq!(
        upload.request_schema.as_ref().map(|s| s.type_label()).as_deref(),
        Some("object{name,size?}")
    );
}

#[test]
fn jsonl_capture_round_trip_through_the_orchestrator() {
    let dir = TempDir::new().unwrap();
    let mut file = File::create(dir.path().join("capture.jsonl")).unwrap();
    for exchange in [
        request("1", 0, "GET", "/users/1")
            .with_response(CapturedResponse::new(200).with_json_body(&json!({"id": 1, "email": "a@x"}))),
        request("2", 1, "GET", "/users/2")
            .with_response(CapturedResponse::new(200).with_json_body(&json!({"id": 2, "email": null}))),
    ] {
        writeln!(file, "{}", serde_json::to_string(&exchange).unwrap()).unwrap();
    }
    writeln!(file, "this line is not json").unwrap();

    let repository = JsonlRepository::new(dir.path()).unwrap();
    assert_eq!(repository.hosts().unwrap(), vec![HOST]);
    let orchestrator = AnalysisOrchestrator::new(Arc::new(repository), Config::default());
    let report = orchestrator.analyze_host(HOST).unwrap();

    let users = report.endpoint("GET", "/users/{user_id}").unwrap();
    assert_eq!(
        users.response_schema.as_ref().map(|s| s.type_label()).as_deref(),
        Some("object{email,id}")
    );
    assert_eq!(users.response_examples["email"], vec![json!("a@x")]);

    let serialized = serde_json::to_value(&report).unwrap();
    assert_eq!(serialized["endpoints"][0]["template"], "/users/{user_id}");
    assert_eq!(serialized["protocols"]["REST"], 2);
}

#[test]
fn unreachable_repository_is_distinct_from_empty_capture() {
    let repository = Arc::new(InMemoryRepository::default());
    let orchestrator = AnalysisOrchestrator::new(repository.clone(), Config::default());
    let empty = orchestrator.analyze_host(HOST).unwrap();
    assert!(empty.complete);
    assert_eq!(empty.exchange_count, 0);

    repository.set_offline(true);
    assert!(matches!(
        orchestrator.analyze_host(HOST),
        Err(AnalysisError::InputUnavailable(_))
    ));
}

#[test]
fn cancellation_yields_a_partial_report() {
    let repository = Arc::new(InMemoryRepository::new(vec![request("1", 0, "GET", "/a")]));
    let orchestrator = AnalysisOrchestrator::new(repository, Config::default());
    orchestrator.cancellation().cancel();
    let report = orchestrator.analyze_host(HOST).unwrap();
    assert!(!report.complete);
    assert!(report.render_digest().contains("PARTIAL"));
}

#[tokio::test(start_paused = true)]
async fn streaming_matches_batch_and_closes_idle_sessions() {
    let exchanges = vec![
        request("1", 0, "GET", "/users/1"),
        request("2", 0, "GET", "/users/2"),
        request("3", 0, "GET", "/users/3"),
    ];
    let batch = analyze_batch(HOST, exchanges.clone(), &Config::default(), None);

    let (handle, mut deltas) = StreamingHandle::spawn(Config::default());
    for exchange in exchanges {
        handle.submit(exchange).await.unwrap();
    }

    let mut superseded = 0;
    loop {
        match deltas.recv().await.unwrap() {
            ReportDelta::EndpointSuperseded { old_template, new_template, .. } => {
                assert_eq!(old_template, "/users/1");
                assert_eq!(new_template, "/users/{user_id}");
                superseded += 1;
            }
            ReportDelta::SessionClosed { session, .. } => {
                assert_eq!(session.exchange_count(), 3);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(superseded, 1);

    let streamed = handle.shutdown().await.unwrap();
    assert_eq!(streamed.len(), 1);
    assert_eq!(streamed[0].endpoints, batch.endpoints);
    assert_eq!(streamed[0].sessions.len(), 1);
}
