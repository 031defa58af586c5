use std::time::Duration;

use crate::pipeline::{PipelineError, TelemetrySink};

use super::TelemetryDocument;

/// Posts telemetry documents as JSON to `<base_url>/<topic prefix>/telemetry`.
///
/// With the default prefix `api/v1/<access token>` this is the ThingsBoard
/// device HTTP API.
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTelemetrySink {
    pub fn new(base_url: &str, topic_prefix: &str, request_timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;

        let endpoint = format!(
            "{}/{}/telemetry",
            base_url.trim_end_matches('/'),
            topic_prefix.trim_matches('/')
        );

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn publish(&self, document: &TelemetryDocument) -> Result<(), PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&document.to_json())
            .send()
            .await
            .map_err(|e| PipelineError::Publish(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Publish(format!("{status}: {body}")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;

    use super::*;

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn accept(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
        received.lock().unwrap().push(body);
        StatusCode::OK
    }

    async fn reject() -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn endpoint_joins_base_url_and_prefix() {
        let sink = HttpTelemetrySink::new("http://tb.local:8080/", "/api/v1/TOKEN/", Duration::from_secs(1)).unwrap();
        assert_eq!(sink.endpoint(), "http://tb.local:8080/api/v1/TOKEN/telemetry");
    }

    #[tokio::test]
    async fn publish_posts_the_document_as_json() {
        let received = Received::default();
        let app = Router::new()
            .route("/api/v1/TOKEN/telemetry", post(accept))
            .with_state(received.clone());
        let base_url = serve(app).await;

        let sink = HttpTelemetrySink::new(&base_url, "api/v1/TOKEN", Duration::from_secs(5)).unwrap();
        let mut doc = TelemetryDocument {
            ts_ms: Some(1_000),
            ..Default::default()
        };
        doc.values.insert("frequency_ipm2xxx_1".to_string(), serde_json::json!(50.0));

        sink.publish(&doc).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(
            received.as_slice(),
            &[serde_json::json!({ "ts": 1_000, "values": { "frequency_ipm2xxx_1": 50.0 } })]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_publish_failure() {
        let app = Router::new().route("/api/v1/BAD/telemetry", post(reject));
        let base_url = serve(app).await;

        let sink = HttpTelemetrySink::new(&base_url, "api/v1/BAD", Duration::from_secs(5)).unwrap();
        let err = sink.publish(&TelemetryDocument::default()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Publish(msg) if msg.starts_with("401")));
    }
}
