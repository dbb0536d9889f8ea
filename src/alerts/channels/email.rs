//! HTML alert mail over the configured SMTP relay.

use crate::alerts::notify::Mailer;
use crate::alerts::{AlertPayload, NotifyError};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncTransport, Message};
use tracing::debug;

pub fn subject(payload: &AlertPayload) -> String {
    format!("[NetPulse] Alert: {} threshold exceeded", payload.metric)
}

pub fn render_html(payload: &AlertPayload) -> String {
    let row = |label: &str, value: &str, last: bool| {
        let border = if last { "" } else { " style=\"border-bottom: 1px solid #eee;\"" };
        format!(
            "<tr{border}><td style=\"padding: 8px; font-weight: bold;\">{label}</td>\
             <td style=\"padding: 8px;\">{value}</td></tr>"
        )
    };

    let rows = [
        row("Metric", payload.metric.as_str(), false),
        row("Current Value", &format!("{:.2}", payload.current_value), false),
        row("Threshold", &format!("{} {}", payload.comparison, payload.threshold), false),
        row("Duration", &format!("{} minutes", payload.duration_min), false),
        row("Fired At", &payload.fired_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(), true),
    ]
    .concat();

    format!(
        "<div style=\"font-family: sans-serif; max-width: 600px;\">\
         <h2 style=\"color: #f44336;\">⚠️ NetPulse Alert</h2>\
         <p style=\"font-size: 16px;\">{}</p>\
         <table style=\"border-collapse: collapse; width: 100%; margin-top: 16px;\">{}</table>\
         <p style=\"margin-top: 16px; color: #666; font-size: 12px;\">Sent by NetPulse ISP Monitor</p>\
         </div>",
        payload.message, rows
    )
}

pub(crate) async fn send(mailer: &Mailer, to: &str, payload: &AlertPayload) -> Result<(), NotifyError> {
    let message = Message::builder()
        .from(mailer.from.parse::<Mailbox>()?)
        .to(to.parse::<Mailbox>()?)
        .subject(subject(payload))
        .header(ContentType::TEXT_HTML)
        .body(render_html(payload))?;

    let response = mailer.transport.send(message).await?;
    debug!(to, code = %response.code(), "alert mail accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertConfig, Comparison};
    use crate::metrics::Metric;
    use chrono::{TimeZone, Utc};

    fn payload() -> AlertPayload {
        let config = AlertConfig {
            id: "rule-3".into(),
            probe_id: None,
            metric: Metric::Bufferbloat,
            threshold: 100.0,
            comparison: Comparison::Gte,
            duration_min: 30,
            channel: "email".into(),
            channel_config: serde_json::json!({"email": "ops@example.net"}),
            is_active: true,
        };
        AlertPayload::new(&config, 250.0, Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
    }

    #[test]
    fn test_subject() {
        assert_eq!(subject(&payload()), "[NetPulse] Alert: bufferbloat threshold exceeded");
    }

    #[test]
    fn test_html_body_lists_details() {
        let html = render_html(&payload());
        assert!(html.contains("bufferbloat gte 100 for 30 minutes (current: 250.00)"));
        assert!(html.contains("<td style=\"padding: 8px;\">250.00</td>"));
        assert!(html.contains("gte 100"));
        assert!(html.contains("30 minutes"));
        assert!(html.contains("2024-05-06 07:08:09 UTC"));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_rejected_before_sending() {
        let notifier = crate::alerts::Notifier::new(
            &crate::config::SmtpConfig::default(),
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        let target = crate::alerts::NotificationTarget::Email { to: "not an address".into() };
        let err = notifier.send(&target, &payload()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));
    }
}
