//! Generic webhook: the alert payload posted as-is.

use super::post_json;
use crate::alerts::{AlertPayload, NotifyError};

pub async fn send(http: &reqwest::Client, url: &str, payload: &AlertPayload) -> Result<(), NotifyError> {
    post_json(http, "webhook", url, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertConfig, Comparison};
    use crate::metrics::Metric;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> AlertPayload {
        let config = AlertConfig {
            id: "rule-7".into(),
            probe_id: None,
            metric: Metric::PacketLoss,
            threshold: 2.0,
            comparison: Comparison::Gte,
            duration_min: 10,
            channel: "webhook".into(),
            channel_config: json!({}),
            is_active: true,
        };
        AlertPayload::new(&config, 4.0, Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap())
    }

    #[tokio::test]
    async fn test_posts_payload_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({
                "alert_id": "rule-7",
                "probe_id": null,
                "metric": "packet_loss",
                "threshold": 2.0,
                "current_value": 4.0,
                "comparison": "gte",
                "duration_min": 10,
                "message": "packet_loss gte 2 for 10 minutes (current: 4.00)",
                "fired_at": "2024-03-04T05:06:07Z",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        send(&reqwest::Client::new(), &format!("{}/hook", server.uri()), &payload())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = send(&reqwest::Client::new(), &server.uri(), &payload()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { channel: "webhook", status } if status.as_u16() == 500));
    }
}
