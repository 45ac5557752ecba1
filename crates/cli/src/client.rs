//! API client for communicating with the portal server

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the portal server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with_query(path, &[]).await
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path, query)?)
            .send()
            .await
            .context("Failed to send request")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path, &[])?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(path, &[])?)
            .send()
            .await
            .context("Failed to send request")?;

        check(response).await?;
        Ok(())
    }
}

/// Turn a non-success response into an error carrying the server's message
async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => anyhow::bail!("API error ({}, {}): {}", status, error.code, error.message),
        Err(_) => anyhow::bail!("API error ({}): {}", status, body),
    }
}

// API response types

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    pub gpu_count: f64,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub storage_tb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub id: String,
    pub project_name: String,
    pub owner: String,
    #[serde(default)]
    pub organisation: String,
    #[serde(default)]
    pub summary: String,
    pub preferred_runtime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub requirements: Requirements,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    pub project_name: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_image: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub requirements: Requirements,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: String,
    pub request_id: String,
    pub namespace: String,
    pub granted: Requirements,
    pub cluster_target: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityView {
    pub total: Requirements,
    pub granted: Requirements,
    pub available: Requirements,
    #[serde(default)]
    pub over_committed: Vec<String>,
    pub active_allocations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet: Option<FleetSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub nodes: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub total: Requirements,
    pub used: Requirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub cpu_utilization: Option<f64>,
    pub memory_utilization: Option<f64>,
    pub storage_utilization: Option<f64>,
    pub gpu_utilization: Option<f64>,
    pub cpu_cores: Option<f64>,
    pub memory_total_gb: Option<f64>,
    pub storage_total_tb: Option<f64>,
    pub gpu_count: Option<f64>,
    pub collected_at: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: String,
    pub node_name: String,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub summary: FleetSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetImage {
    pub reference: String,
    pub size_bytes: u64,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
    pub node_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetImages {
    pub images: Vec<FleetImage>,
    #[serde(default)]
    pub errors: Vec<NodeFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub ssh_user: String,
    pub ssh_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const REQUEST_JSON: &str = r#"{
        "id": "7f1c2d3e-0000-4000-8000-000000000001",
        "projectName": "Deep Learning Vision",
        "owner": "alice",
        "organisation": "Vision Lab",
        "summary": "",
        "preferredRuntime": "kubernetes",
        "tags": [],
        "requirements": {"gpuCount": 4, "cpuCores": 16, "memoryGb": 64, "storageTb": 1},
        "state": "pending",
        "createdAt": "2026-03-01T10:00:00Z",
        "updatedAt": "2026-03-01T10:00:00Z"
    }"#;

    #[tokio::test]
    async fn test_list_requests_with_filters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/requests")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("owner".into(), "alice".into()),
                Matcher::UrlEncoded("state".into(), "pending".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!("[{}]", REQUEST_JSON))
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let requests: Vec<ResourceRequest> = client
            .get_with_query(
                "api/v1/requests",
                &[("owner", "alice".to_string()), ("state", "pending".to_string())],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].requirements.gpu_count, 4.0);
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/requests/r1/approve")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":"capacity_exceeded","message":"insufficient gpu capacity: requested 1, available 0, short by 1"}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .post::<Allocation, _>("api/v1/requests/r1/approve", &serde_json::json!({}))
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("409"));
        assert!(err.contains("capacity_exceeded"));
        assert!(err.contains("short by 1"));
    }

    #[tokio::test]
    async fn test_delete_accepts_no_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/v1/requests/r1")
            .with_status(204)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        client.delete("api/v1/requests/r1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fleet_images_parse() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/fleet/images")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"images":[{"reference":"redis:7","sizeBytes":117000000,"hosts":["a","b"]}],
                    "errors":[{"nodeId":"c","error":"node unreachable: refused"}]}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let inventory: FleetImages = client.get("api/v1/fleet/images").await.unwrap();
        assert_eq!(inventory.images[0].hosts, vec!["a", "b"]);
        assert_eq!(inventory.errors[0].node_id, "c");
    }
}
