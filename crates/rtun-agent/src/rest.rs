//! HTTP client for the agent REST surface (§6, §4.7): heartbeat, command
//! poll, and completion report. Sends both auth header variants per
//! §4.7A so it keeps working against either edge build.

use std::time::Duration;

use reqwest::Client;
use rtun_core::models::{
    CommandView, CommandsResponse, CompleteCommandRequest, HeartbeatRequest, HeartbeatResponse, Id,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AgentApiClient {
    http: Client,
    server_url: String,
    api_key: String,
}

impl AgentApiClient {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds with a fixed timeout"),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.server_url))
            .header("X-API-Key", &self.api_key)
            .header("X-Agent-API-Key", &self.api_key)
    }

    pub async fn heartbeat(&self, system_info: serde_json::Value) -> reqwest::Result<bool> {
        let resp = self
            .request(reqwest::Method::POST, "/api/agent/heartbeat")
            .json(&HeartbeatRequest { system_info })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: HeartbeatResponse = resp.json().await?;
        Ok(body.success)
    }

    pub async fn poll_commands(&self) -> reqwest::Result<Vec<CommandView>> {
        let resp = self
            .request(reqwest::Method::GET, "/api/agent/commands")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(Vec::new());
        }
        let body: CommandsResponse = resp.json().await?;
        Ok(body.commands)
    }

    pub async fn complete_command(
        &self,
        command_id: Id,
        success: bool,
        message: String,
        pid: Option<u32>,
    ) -> reqwest::Result<bool> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/api/agent/commands/{command_id}/complete"),
            )
            .json(&CompleteCommandRequest {
                success,
                message,
                pid,
            })
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn heartbeat_sends_both_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/heartbeat"))
            .and(header("x-api-key", "secret"))
            .and(header("x-agent-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(HeartbeatResponse { success: true }))
            .mount(&server)
            .await;

        let client = AgentApiClient::new(server.uri(), "secret");
        let ok = client.heartbeat(serde_json::json!({})).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn poll_commands_returns_empty_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agent/commands"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = AgentApiClient::new(server.uri(), "secret");
        let commands = client.poll_commands().await.unwrap();
        assert!(commands.is_empty());
    }

    #[tokio::test]
    async fn complete_command_reports_success_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/commands/42/complete"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = AgentApiClient::new(server.uri(), "secret");
        let ok = client
            .complete_command(42, true, "started".into(), Some(123))
            .await
            .unwrap();
        assert!(ok);
    }
}
