use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use super::{extract_execution_id, ExecutionStatus, TriggerPayload, WorkflowEngine};
use crate::error::{AppError, ExternalError};
use crate::trading::http::{build_client, send_json};

const SERVICE: &str = "n8n";

/// n8n REST 客户端
pub struct N8nClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl N8nClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-N8N-API-KEY", key),
            None => request,
        }
    }
}

#[async_trait]
impl WorkflowEngine for N8nClient {
    async fn trigger(&self, workflow_id: &str, payload: &TriggerPayload) -> Result<String, ExternalError> {
        let url = format!("{}/workflows/{}/trigger", self.base_url, workflow_id);
        let body = serde_json::to_string(payload)
            .map_err(|e| ExternalError::terminal(SERVICE, format!("请求体序列化失败: {}", e)))?;
        debug!("触发 n8n 工作流: url={}, body={}", url, body);

        let request = self
            .with_auth(self.client.post(&url))
            .header("Content-Type", "application/json")
            .body(body);
        let response: Value = send_json(SERVICE, request).await?;

        let execution_id = extract_execution_id(&response)
            .ok_or_else(|| ExternalError::terminal(SERVICE, format!("触发响应缺少执行 id: {}", response)))?;
        info!(
            "n8n 工作流已触发: workflow={}, signal={}, execution={}",
            workflow_id, payload.signal_id, execution_id
        );
        Ok(execution_id)
    }

    async fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, ExternalError> {
        let url = format!("{}/executions/{}", self.base_url, execution_id);
        let request = self.with_auth(self.client.get(&url));
        let response: Value = send_json(SERVICE, request).await?;
        Ok(ExecutionStatus::from_value(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let c = N8nClient::new("http://localhost:5678/api/v1/", Some(String::new()), Duration::from_secs(5)).unwrap();
        assert_eq!(c.base_url, "http://localhost:5678/api/v1");
        assert!(c.api_key.is_none());
    }
}
