//! Discord webhook embed.

use super::post_json;
use crate::alerts::{AlertPayload, NotifyError};
use crate::metrics::Metric;
use serde_json::{json, Value};

pub fn color_for(metric: Metric) -> u32 {
    match metric {
        Metric::Latency | Metric::Jitter => 0xff9800,
        Metric::PacketLoss => 0xf44336,
        Metric::Dns => 0x2196f3,
        Metric::Bufferbloat => 0x9c27b0,
    }
}

pub fn embed(payload: &AlertPayload) -> Value {
    json!({
        "title": format!("⚠️ NetPulse Alert: {}", payload.metric),
        "description": payload.message,
        "color": color_for(payload.metric),
        "fields": [
            { "name": "Metric", "value": payload.metric.as_str(), "inline": true },
            { "name": "Current Value", "value": format!("{:.2}", payload.current_value), "inline": true },
            { "name": "Threshold", "value": format!("{} {}", payload.comparison, payload.threshold), "inline": true },
            { "name": "Duration", "value": format!("{} min", payload.duration_min), "inline": true },
        ],
        "timestamp": payload.fired_at.to_rfc3339(),
        "footer": { "text": "NetPulse ISP Monitor" },
    })
}

pub async fn send(http: &reqwest::Client, url: &str, payload: &AlertPayload) -> Result<(), NotifyError> {
    post_json(http, "discord", url, &json!({ "embeds": [embed(payload)] })).await
}
