//! End-to-end: tasks flow from the control plane through the command
//! pipeline and their results flow back.
#![cfg(unix)]

use gameapd_e2e_tests::{server_document, write_command_script, DaemonHarness};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_empty_working_tasks(mock: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gdaemon_api/tasks"))
        .and(query_param("status", "working"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock)
        .await;
}

#[tokio::test]
async fn test_command_execute_task_round_trip() {
    let mock = MockServer::start().await;
    let work = tempfile::tempdir().unwrap();

    mount_empty_working_tasks(&mock).await;

    Mock::given(method("GET"))
        .and(path("/gdaemon_api/tasks"))
        .and(query_param("status", "waiting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1,
                "run_after_id": 0,
                "server_id": null,
                "command": "echo hello",
                "task_command": "cmd_exec",
                "status": "waiting"
            }
        ])))
        .mount(&mock)
        .await;

    // one transition to working, one output append, one terminal save
    Mock::given(method("PUT"))
        .and(path("/gdaemon_api/tasks/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let harness = DaemonHarness::new(&mock, work.path());

    // run until the terminal status reached the control plane
    harness
        .run_until(
            || task_reached_status(&mock, "/gdaemon_api/tasks/1", "success"),
            Duration::from_secs(10),
        )
        .await;

    let requests = mock.received_requests().await.unwrap();
    let puts: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path() == "/gdaemon_api/tasks/1")
        .collect();

    assert!(!puts.is_empty());

    let bodies: Vec<serde_json::Value> = puts
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    assert!(bodies.iter().any(|b| b["status"] == "working"));
    assert!(bodies
        .iter()
        .any(|b| b["output_append"].as_str().unwrap_or_default().contains("hello")));
    assert_eq!(bodies.last().unwrap()["status"], "success");
}

#[tokio::test]
async fn test_game_server_start_task_uses_cached_server() {
    let mock = MockServer::start().await;
    let work = tempfile::tempdir().unwrap();
    write_command_script(&work.path().join("s3"));

    mount_empty_working_tasks(&mock).await;

    Mock::given(method("GET"))
        .and(path("/gdaemon_api/servers/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_document(3, "s3")))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/gdaemon_api/tasks"))
        .and(query_param("status", "waiting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 2,
                "run_after_id": 0,
                "server_id": 3,
                "command": "",
                "task_command": "gsstart",
                "status": "waiting"
            }
        ])))
        .mount(&mock)
        .await;

    Mock::given(method("PUT"))
        .and(path("/gdaemon_api/tasks/2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let harness = DaemonHarness::new(&mock, work.path());

    harness
        .run_until(
            || task_reached_status(&mock, "/gdaemon_api/tasks/2", "success"),
            Duration::from_secs(10),
        )
        .await;

    let requests = mock.received_requests().await.unwrap();
    let bodies: Vec<serde_json::Value> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path() == "/gdaemon_api/tasks/2")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    assert!(bodies
        .iter()
        .any(|b| b["output_append"].as_str().unwrap_or_default().contains("start")));
    assert_eq!(bodies.last().unwrap()["status"], "success");
}

/// True once the control plane has received a task PUT with `status`.
async fn task_reached_status(mock: &MockServer, task_path: &str, status: &str) -> bool {
    let requests = mock.received_requests().await.unwrap_or_default();
    requests.iter().any(|r| {
        r.method.as_str() == "PUT"
            && r.url.path() == task_path
            && serde_json::from_slice::<serde_json::Value>(&r.body)
                .map(|b| b["status"] == status)
                .unwrap_or(false)
    })
}

#[tokio::test]
async fn test_server_state_flows_back_in_bulk() {
    let mock = MockServer::start().await;
    let work = tempfile::tempdir().unwrap();

    for id in 1..=10 {
        Mock::given(method("GET"))
            .and(path(format!("/gdaemon_api/servers/{id}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(server_document(id, &format!("s{id}"))),
            )
            .mount(&mock)
            .await;
    }

    Mock::given(method("PATCH"))
        .and(path("/gdaemon_api/servers"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock)
        .await;

    let harness = DaemonHarness::new(&mock, work.path());

    use gameapd_domain::ServerRepository;
    for id in 1..=10 {
        let server = harness.server_repo.find_by_id(id).await.unwrap().unwrap();
        server.set_process_active(true);
        harness.server_repo.save(&server).await.unwrap();
    }

    harness.server_repo.flush_pending().await;

    let requests = mock.received_requests().await.unwrap();
    let patches: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PATCH")
        .collect();
    assert_eq!(patches.len(), 1);

    let body: serde_json::Value = serde_json::from_slice(&patches[0].body).unwrap();
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|e| e["process_active"] == 1));
}
