//! Weighting profiles for different use cases.

use crate::metrics::Metric;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    General,
    Gaming,
    VideoCalls,
    Streaming,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::General => "general",
            Profile::Gaming => "gaming",
            Profile::VideoCalls => "video_calls",
            Profile::Streaming => "streaming",
        }
    }

    /// Multiplier applied to a metric's raw penalty.
    pub fn weight(&self, metric: Metric) -> f64 {
        // latency, jitter, packet_loss, dns, bufferbloat
        let weights: [f64; 5] = match self {
            Profile::General => [1.0, 1.0, 1.0, 1.0, 1.0],
            Profile::Gaming => [1.5, 1.5, 1.2, 0.5, 1.3],
            Profile::VideoCalls => [1.3, 1.3, 1.5, 0.5, 1.0],
            Profile::Streaming => [0.5, 0.5, 1.0, 0.5, 1.5],
        };
        match metric {
            Metric::Latency => weights[0],
            Metric::Jitter => weights[1],
            Metric::PacketLoss => weights[2],
            Metric::Dns => weights[3],
            Metric::Bufferbloat => weights[4],
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Profile::General),
            "gaming" => Ok(Profile::Gaming),
            "video_calls" => Ok(Profile::VideoCalls),
            "streaming" => Ok(Profile::Streaming),
            other => anyhow::bail!("unknown profile '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_is_unweighted() {
        assert!(Metric::ALL.iter().all(|m| Profile::General.weight(*m) == 1.0));
    }

    #[test]
    fn test_streaming_emphasises_bufferbloat() {
        assert_eq!(Profile::Streaming.weight(Metric::Bufferbloat), 1.5);
        assert_eq!(Profile::Streaming.weight(Metric::Latency), 0.5);
    }

    #[test]
    fn test_parse() {
        assert_eq!("video_calls".parse::<Profile>().unwrap(), Profile::VideoCalls);
        assert!("office".parse::<Profile>().is_err());
    }
}
