use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use nurture_core::config::BackendConfig;
use nurture_core::{NurtureError, NurtureResult};
use nurture_journey::FlowConfiguration;

use crate::backend::FlowBackend;
use crate::types::{
    BatchingReport, ControlResponse, ExecutionEvent, ExecutionState, PersistedFlow,
    StartExecutionRequest, StartedExecution,
};

/// [`FlowBackend`] over HTTP/JSON.
pub struct HttpFlowBackend {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpFlowBackend {
    pub fn new(config: &BackendConfig) -> NurtureResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| NurtureError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn execution_url(&self, flow_id: &str, execution_id: &str, action: &str) -> String {
        self.url(&format!("flows/{}/executions/{}/{}", flow_id, execution_id, action))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> NurtureResult<T> {
        let req = match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };

        let resp = req
            .send()
            .await
            .map_err(|e| NurtureError::Transport(format!("Request failed: {}", e)))?;

        let status = resp.status();
        debug!(url = %resp.url(), status = status.as_u16(), "Backend responded");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NurtureError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| NurtureError::Transport(format!("Failed to parse response: {}", e)))
    }
}

impl FlowBackend for HttpFlowBackend {
    fn persist_flow<'a>(
        &'a self,
        flow_id: Option<&'a str>,
        config: &'a FlowConfiguration,
    ) -> BoxFuture<'a, NurtureResult<PersistedFlow>> {
        Box::pin(async move {
            let req = match flow_id {
                Some(id) => self.client.put(self.url(&format!("flows/{}", id))),
                None => self.client.post(self.url("flows")),
            };
            self.send(req.json(config)).await
        })
    }

    fn fetch_execution_status<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: Option<&'a str>,
    ) -> BoxFuture<'a, NurtureResult<ExecutionState>> {
        Box::pin(async move {
            let mut req = self
                .client
                .get(self.url(&format!("flows/{}/executions/status", flow_id)));
            if let Some(id) = execution_id {
                req = req.query(&[("execution_id", id)]);
            }
            self.send(req).await
        })
    }

    fn fetch_execution_events<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
        limit: u32,
        offset: u32,
    ) -> BoxFuture<'a, NurtureResult<Vec<ExecutionEvent>>> {
        Box::pin(async move {
            let req = self
                .client
                .get(self.execution_url(flow_id, execution_id, "events"))
                .query(&[("limit", limit), ("offset", offset)]);
            self.send(req).await
        })
    }

    fn fetch_batching_status<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<BatchingReport>> {
        Box::pin(async move {
            let req = self
                .client
                .get(self.execution_url(flow_id, execution_id, "batching"));
            self.send(req).await
        })
    }

    fn start_execution<'a>(
        &'a self,
        request: &'a StartExecutionRequest,
    ) -> BoxFuture<'a, NurtureResult<StartedExecution>> {
        Box::pin(async move {
            let req = self
                .client
                .post(self.url(&format!("flows/{}/executions", request.flow_id)))
                .json(request);
            self.send(req).await
        })
    }

    fn cancel_execution<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>> {
        Box::pin(async move {
            let req = self
                .client
                .post(self.execution_url(flow_id, execution_id, "cancel"));
            self.send(req).await
        })
    }

    fn pause_execution<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>> {
        Box::pin(async move {
            let req = self
                .client
                .post(self.execution_url(flow_id, execution_id, "pause"));
            self.send(req).await
        })
    }

    fn resume_execution<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>> {
        Box::pin(async move {
            let req = self
                .client
                .post(self.execution_url(flow_id, execution_id, "resume"));
            self.send(req).await
        })
    }
}
