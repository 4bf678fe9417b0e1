//! JSON-over-HTTP client for the remote stack service.
//!
//! Routes (relative to the configured endpoint):
//! - `POST   /stacks/{name}/change-sets`
//! - `GET    /stacks/{name}/change-sets/{id}`
//! - `POST   /stacks/{name}/change-sets/{id}/execute`
//! - `GET    /stacks/{name}/events?next_token=...`
//! - `GET    /stacks/{name}`
//! - `DELETE /stacks/{name}`
//! - `GET    /clusters/{cluster}/services/{service}/rollout`
//!
//! Path segments are percent-encoded; nested stack ids contain slashes.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{
    ApiError, CreateChangeSetInput, RolloutResolver, RolloutStatus, StackApi, StackEventsPage,
};
use crate::domain::{ChangeSet, ChangeSetRef, Stack};

/// HTTP implementation of `StackApi` and `RolloutResolver`
pub struct HttpStackClient {
    /// Base URL without trailing slash
    endpoint: String,
    /// Optional bearer token
    token: Option<String>,
    /// HTTP client
    client: reqwest::Client,
}

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpStackClient {
    /// Create a new client for an endpoint
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Build a request URL from unescaped path segments
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;

        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidEndpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<Response, ApiError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        debug!(%status, subject, %message, "Stack service request failed");

        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(subject.to_string()),
            StatusCode::CONFLICT => ApiError::AlreadyExists(subject.to_string()),
            _ => ApiError::Service {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        subject: &str,
    ) -> Result<T, ApiError> {
        let response = self.send(self.client.get(self.url(segments)?), subject).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl StackApi for HttpStackClient {
    async fn create_change_set(
        &self,
        input: &CreateChangeSetInput,
    ) -> Result<ChangeSetRef, ApiError> {
        let url = self.url(&["stacks", input.stack_name.as_str(), "change-sets"])?;
        let response = self
            .send(self.client.post(url).json(input), &input.stack_name)
            .await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_id: &str,
    ) -> Result<ChangeSet, ApiError> {
        self.get_json(&["stacks", stack_name, "change-sets", change_set_id], change_set_id)
            .await
    }

    async fn execute_change_set(
        &self,
        stack_name: &str,
        change_set_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&["stacks", stack_name, "change-sets", change_set_id, "execute"])?;
        self.send(self.client.post(url), change_set_id).await?;
        Ok(())
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackEventsPage, ApiError> {
        let mut request = self.client.get(self.url(&["stacks", stack_name, "events"])?);
        if let Some(token) = next_token {
            request = request.query(&[("next_token", token)]);
        }

        let response = self.send(request, stack_name).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Stack, ApiError> {
        self.get_json(&["stacks", stack_name], stack_name).await
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ApiError> {
        let url = self.url(&["stacks", stack_name])?;
        self.send(self.client.delete(url), stack_name).await?;
        Ok(())
    }
}

#[async_trait]
impl RolloutResolver for HttpStackClient {
    async fn resolve_service_rollout_status(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<RolloutStatus, ApiError> {
        self.get_json(&["clusters", cluster, "services", service, "rollout"], service)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = HttpStackClient::new("https://stacks.example.com/v1/", None);
        assert_eq!(
            client.url(&["stacks", "demo"]).unwrap().as_str(),
            "https://stacks.example.com/v1/stacks/demo"
        );
    }

    #[test]
    fn test_url_escapes_nested_stack_ids() {
        let client = HttpStackClient::new("https://stacks.example.com", None);
        let url = client
            .url(&["stacks", "arn:stack/demo-Addons/42", "events"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://stacks.example.com/stacks/arn:stack%2Fdemo-Addons%2F42/events"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let client = HttpStackClient::new("not a url", None);
        assert!(matches!(
            client.url(&["stacks"]),
            Err(ApiError::InvalidEndpoint(_))
        ));
    }
}
