//! Daemon task repository.

use crate::client::{ApiClient, ApiRequest};
use async_trait::async_trait;
use gameapd_common::{Error, Result, ResultExt};
use gameapd_domain::{GDTask, GDTaskCommand, GDTaskRepository, GDTaskStatus, ServerRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Task document as served by the control plane.
#[derive(Debug, Deserialize)]
struct TaskPayload {
    id: i64,
    #[serde(default)]
    run_after_id: i64,
    #[serde(default)]
    server_id: Option<i64>,
    /// Free-form command line, meaningful for `cmd_exec` tasks.
    #[serde(default)]
    command: String,
    task_command: GDTaskCommand,
    status: GDTaskStatus,
}

#[derive(Debug, Serialize)]
struct TaskSavePayload<'a> {
    status: GDTaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_append: Option<&'a str>,
}

/// HTTP-backed task feed. Tasks referencing a server are bound to the
/// shared aggregate from the server repository.
pub struct ApiGDTaskRepository {
    client: Arc<dyn ApiClient>,
    server_repo: Arc<dyn ServerRepository>,
}

impl ApiGDTaskRepository {
    pub fn new(client: Arc<dyn ApiClient>, server_repo: Arc<dyn ServerRepository>) -> Self {
        Self {
            client,
            server_repo,
        }
    }

    async fn task_from_payload(&self, payload: TaskPayload) -> Result<Arc<GDTask>> {
        let server = match payload.server_id {
            Some(server_id) => self
                .server_repo
                .find_by_id(server_id)
                .await
                .context("failed to load task server")?,
            None => None,
        };

        if payload.server_id.is_some() && server.is_none() {
            warn!(task_id = payload.id, "task references an unknown server");
        }

        Ok(Arc::new(GDTask::new(
            payload.id,
            payload.run_after_id,
            server,
            payload.task_command,
            payload.command,
            payload.status,
        )))
    }

    async fn put(&self, task: &Arc<GDTask>, output_append: Option<&str>) -> Result<()> {
        let body = serde_json::to_vec(&TaskSavePayload {
            status: task.status(),
            output_append,
        })
        .map_err(|e| Error::internal(format!("failed to marshal task: {e}")))?;

        let response = self
            .client
            .request(ApiRequest::put("/gdaemon_api/tasks/{id}", body).with_path_param("id", task.id()))
            .await
            .context("failed to save task")?;

        if !response.is_ok() {
            return Err(response.into_error().context("failed to save task"));
        }

        Ok(())
    }
}

#[async_trait]
impl GDTaskRepository for ApiGDTaskRepository {
    async fn find_by_status(&self, status: GDTaskStatus) -> Result<Vec<Arc<GDTask>>> {
        let response = self
            .client
            .request(
                ApiRequest::get("/gdaemon_api/tasks").with_query("status", status.to_string()),
            )
            .await?;

        if !response.is_ok() {
            return Err(response.into_error().context("failed to load tasks"));
        }

        let payloads: Vec<TaskPayload> = serde_json::from_slice(&response.body)
            .map_err(|e| Error::validation(format!("bad task list: {e}")))?;

        let mut tasks = Vec::with_capacity(payloads.len());
        for payload in payloads {
            tasks.push(self.task_from_payload(payload).await?);
        }

        Ok(tasks)
    }

    async fn save(&self, task: &Arc<GDTask>) -> Result<()> {
        self.put(task, None).await
    }

    async fn append_output(&self, task: &Arc<GDTask>, output: &[u8]) -> Result<()> {
        if output.is_empty() {
            return Ok(());
        }

        task.append_output(output);

        let text = String::from_utf8_lossy(output);
        self.put(task, Some(text.as_ref())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gameapd_domain::{InstallationStatus, Server, ServerConfig};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticServerRepo {
        server: Arc<Server>,
    }

    #[async_trait]
    impl ServerRepository for StaticServerRepo {
        async fn ids(&self) -> Result<Vec<i64>> {
            Ok(vec![self.server.id()])
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<Arc<Server>>> {
            Ok((id == self.server.id()).then(|| self.server.clone()))
        }

        async fn save(&self, _server: &Arc<Server>) -> Result<()> {
            Ok(())
        }
    }

    fn repo_for(mock: &MockServer) -> ApiGDTaskRepository {
        let cfg = gameapd_config::Config::load_from_string(&format!(
            "ds_id: 1\napi_host: \"{}\"\napi_key: key\n",
            mock.uri()
        ))
        .unwrap();
        let client = Arc::new(
            crate::client::HttpApiClient::new(&cfg)
                .unwrap()
                .with_retries(0),
        );
        let server = Arc::new(Server::new(
            3,
            "00000000-0000-4000-8000-000000000003",
            "00000003",
            InstallationStatus::Installed,
            ServerConfig::default(),
        ));
        ApiGDTaskRepository::new(client, Arc::new(StaticServerRepo { server }))
    }

    #[tokio::test]
    async fn test_find_waiting_tasks_binds_servers() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gdaemon_api/tasks"))
            .and(query_param("status", "waiting"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": 1,
                    "run_after_id": 0,
                    "server_id": 3,
                    "command": "",
                    "task_command": "gsstart",
                    "status": "waiting"
                },
                {
                    "id": 2,
                    "run_after_id": 1,
                    "server_id": null,
                    "command": "whoami",
                    "task_command": "cmd_exec",
                    "status": "waiting"
                }
            ])))
            .mount(&mock)
            .await;

        let repo = repo_for(&mock);
        let tasks = repo.find_by_status(GDTaskStatus::Waiting).await.unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id(), 1);
        assert_eq!(tasks[0].task(), GDTaskCommand::GameServerStart);
        assert_eq!(tasks[0].server().unwrap().id(), 3);
        assert_eq!(tasks[1].run_after_id(), 1);
        assert!(tasks[1].server().is_none());
        assert_eq!(tasks[1].command(), "whoami");
    }

    #[tokio::test]
    async fn test_save_puts_status() {
        let mock = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/gdaemon_api/tasks/7"))
            .and(body_partial_json(json!({"status": "working"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock)
            .await;

        let repo = repo_for(&mock);
        let task = Arc::new(GDTask::new(
            7,
            0,
            None,
            GDTaskCommand::GameServerStart,
            "",
            GDTaskStatus::Working,
        ));

        repo.save(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_output_sends_and_accumulates() {
        let mock = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/gdaemon_api/tasks/7"))
            .and(body_partial_json(
                json!({"status": "working", "output_append": "start\n"}),
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock)
            .await;

        let repo = repo_for(&mock);
        let task = Arc::new(GDTask::new(
            7,
            0,
            None,
            GDTaskCommand::GameServerStart,
            "",
            GDTaskStatus::Working,
        ));

        repo.append_output(&task, b"start\n").await.unwrap();
        assert_eq!(task.output(), b"start\n");
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gdaemon_api/tasks"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock)
            .await;

        let repo = repo_for(&mock);
        let err = repo.find_by_status(GDTaskStatus::Waiting).await.unwrap_err();
        assert!(err.to_string().contains("invalid response from API"));
    }
}
