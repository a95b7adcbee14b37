//! Population service notifications.
//!
//! Before fetching names remotely, the orchestrator tells an external
//! population service which signals of which file are about to be needed.
//! The call is fire-and-forget: its outcome is only logged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WandsResult;

/// Body posted to the population service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationRequest {
    pub uri: String,
    pub signals: Vec<String>,
}

/// Receiver of population requests.
#[async_trait]
pub trait PopulationNotifier: Send + Sync {
    async fn notify(&self, request: &PopulationRequest) -> WandsResult<()>;
}

/// Posts population requests as JSON over HTTP.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PopulationNotifier for HttpNotifier {
    async fn notify(&self, request: &PopulationRequest) -> WandsResult<()> {
        debug!(
            url = %self.url,
            uri = %request.uri,
            signals = request.signals.len(),
            "Notifying population service"
        );

        let response = self.http_client.post(&self.url).json(request).send().await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if (200..300).contains(&status) {
            info!(status, body = %body, "Population service accepted request");
        } else {
            warn!(status, body = %body, "Population service rejected request");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_request_body_shape() {
        let request = PopulationRequest {
            uri: "/data/shot-1.h5".to_string(),
            signals: vec!["/diag/a".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({ "uri": "/data/shot-1.h5", "signals": ["/diag/a"] })
        );
    }

    #[tokio::test]
    async fn test_posts_json_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/data", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 4096];
            // Read until the JSON body has arrived
            while !String::from_utf8_lossy(&received).contains("]}") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                .await
                .unwrap();
            String::from_utf8(received).unwrap()
        });

        let notifier = HttpNotifier::new(url);
        notifier
            .notify(&PopulationRequest {
                uri: "shot.h5".to_string(),
                signals: vec!["a".to_string(), "b".to_string()],
            })
            .await
            .unwrap();

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /data "));
        assert!(raw.contains(r#"{"uri":"shot.h5","signals":["a","b"]}"#));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/data", listener.local_addr().unwrap());
        drop(listener);

        let result = HttpNotifier::new(url)
            .notify(&PopulationRequest {
                uri: "f".to_string(),
                signals: vec![],
            })
            .await;
        assert!(result.is_err());
    }
}
