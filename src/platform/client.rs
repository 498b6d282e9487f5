//! reqwest implementation of [`WorkflowPlatform`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::WorkflowPlatform;
use crate::config::PlatformConfig;
use crate::error::{Error, Result};

const API_KEY_HEADER: &str = "X-N8N-API-KEY";
const MAX_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Upstream error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the platform's `/api/v1` REST API.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl PlatformClient {
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| Error::Config(format!("Invalid platform URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Platform URL '{}' cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(MAX_CONNECT_TIMEOUT_SECS)))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Build a client when a base URL is configured.
    pub fn from_config(config: &PlatformConfig) -> Result<Option<Self>> {
        match config.base_url.as_deref() {
            Some(url) if config.is_configured() => {
                Self::new(url, config.api_key.clone(), config.timeout()).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Platform URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, segments: &[&str], body: Option<Value>) -> Result<Value> {
        let url = self.endpoint(segments)?;
        debug!(method = %method, url = %url, "Platform request");

        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_send_error)?;

        if !status.is_success() {
            warn!(method = %method, url = %url, status = status.as_u16(), "Platform request failed");
            return Err(Error::upstream_status(status.as_u16(), truncate(&text)));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| Error::Upstream {
            status: Some(status.as_u16()),
            message: format!("Platform returned invalid JSON: {}", e),
            retryable: false,
        })
    }
}

fn classify_send_error(e: reqwest::Error) -> Error {
    let status = e.status().map(|s| s.as_u16());
    let retryable = e.is_timeout() || e.is_connect() || status.map_or(false, |s| s >= 500);
    let message = if e.is_timeout() {
        format!("Platform request timed out: {}", e)
    } else if e.is_connect() {
        format!("Platform unreachable: {}", e)
    } else {
        format!("Platform request failed: {}", e)
    };

    Error::Upstream {
        status,
        message,
        retryable,
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", cut)
    }
}

#[async_trait]
impl WorkflowPlatform for PlatformClient {
    async fn list_workflows(&self) -> Result<Value> {
        self.request(Method::GET, &["workflows"], None).await
    }

    async fn get_workflow(&self, id: &str) -> Result<Value> {
        self.request(Method::GET, &["workflows", id], None).await
    }

    async fn create_workflow(&self, data: Value) -> Result<Value> {
        self.request(Method::POST, &["workflows"], Some(data)).await
    }

    async fn update_workflow(&self, id: &str, data: Value) -> Result<Value> {
        self.request(Method::PUT, &["workflows", id], Some(data)).await
    }

    async fn activate_workflow(&self, id: &str) -> Result<Value> {
        self.request(Method::POST, &["workflows", id, "activate"], None)
            .await
    }

    async fn deactivate_workflow(&self, id: &str) -> Result<Value> {
        self.request(Method::POST, &["workflows", id, "deactivate"], None)
            .await
    }

    async fn list_variables(&self) -> Result<Value> {
        self.request(Method::GET, &["variables"], None).await
    }

    async fn create_variable(&self, key: &str, value: &str) -> Result<Value> {
        self.request(
            Method::POST,
            &["variables"],
            Some(json!({ "key": key, "value": value })),
        )
        .await
    }

    async fn list_projects(&self) -> Result<Value> {
        self.request(Method::GET, &["projects"], None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned response and hand back the raw request head.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_request(&mut socket).await;

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            head
        });

        (format!("http://{}", addr), handle)
    }

    /// Read headers plus a Content-Length body.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            data.extend_from_slice(&chunk[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&data[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while data.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
        }

        String::from_utf8_lossy(&data).to_string()
    }

    fn client(base_url: &str) -> PlatformClient {
        PlatformClient::new(base_url, Some("test-key".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_workflows_sends_key_and_parses_json() {
        let (url, server) = serve_once("200 OK", r#"{"data":[{"id":"1"}]}"#).await;

        let value = client(&url).list_workflows().await.unwrap();
        assert_eq!(value["data"][0]["id"], "1");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/v1/workflows HTTP/1.1"));
        assert!(request.to_lowercase().contains("x-n8n-api-key: test-key"));
    }

    #[tokio::test]
    async fn test_create_variable_posts_body() {
        let (url, server) = serve_once("201 Created", "").await;

        let value = client(&url).create_variable("REGION", "eu").await.unwrap();
        assert!(value.is_null());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/v1/variables HTTP/1.1"));
        assert!(request.contains(r#""key":"REGION""#));
    }

    #[tokio::test]
    async fn test_path_prefix_and_id_escaping() {
        let (url, server) = serve_once("200 OK", "{}").await;

        client(&format!("{}/automation/", url))
            .activate_workflow("a b")
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /automation/api/v1/workflows/a%20b/activate HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let (url, _server) = serve_once("503 Service Unavailable", r#"{"message":"busy"}"#).await;

        let err = client(&url).list_projects().await.unwrap_err();
        match &err {
            Error::Upstream { status, message, .. } => {
                assert_eq!(*status, Some(503));
                assert!(message.contains("busy"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.is_retryable());
        assert_eq!(err.code(), "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let (url, _server) = serve_once("404 Not Found", r#"{"message":"not found"}"#).await;

        let err = client(&url).get_workflow("missing").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::ClientError);
    }

    #[tokio::test]
    async fn test_invalid_json_is_terminal() {
        let (url, _server) = serve_once("200 OK", "<html>").await;

        let err = client(&url).list_variables().await.unwrap_err();
        assert!(matches!(err, Error::Upstream { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_platform_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr))
            .list_workflows()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { status: None, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = PlatformClient::new(
            &format!("http://{}", addr),
            None,
            Duration::from_millis(200),
        )
        .unwrap();

        let err = client.list_workflows().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_from_config() {
        assert!(PlatformClient::from_config(&PlatformConfig::default())
            .unwrap()
            .is_none());

        let config = PlatformConfig {
            base_url: Some("http://localhost:5678".into()),
            ..PlatformConfig::default()
        };
        assert!(PlatformClient::from_config(&config).unwrap().is_some());

        let bad = PlatformConfig {
            base_url: Some("not a url".into()),
            ..PlatformConfig::default()
        };
        assert_eq!(
            PlatformClient::from_config(&bad).unwrap_err().code(),
            "CONFIG_ERROR"
        );
    }
}
