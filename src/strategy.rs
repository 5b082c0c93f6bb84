//! Delivery strategy selection
//!
//! Single decision point for how a document reaches the client. The choice
//! depends only on the file size and an optional forced mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::DeliveryConfig;

/// How a document is delivered to a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStrategy {
    /// Client embeds the whole file
    Inline,
    /// Client pages through the raw PDF with byte-range requests
    Streaming,
    /// Server renders individual pages to images
    Image,
}

impl DeliveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStrategy::Inline => "inline",
            DeliveryStrategy::Streaming => "streaming",
            DeliveryStrategy::Image => "image",
        }
    }
}

impl fmt::Display for DeliveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "embed" | "embedded" => Ok(DeliveryStrategy::Inline),
            "streaming" | "stream" | "range" => Ok(DeliveryStrategy::Streaming),
            "image" | "images" | "img" => Ok(DeliveryStrategy::Image),
            other => Err(format!("unknown delivery mode '{}'", other)),
        }
    }
}

/// Size-threshold selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySelector {
    /// Largest size delivered inline
    pub inline_max_bytes: u64,
    /// Largest size delivered by byte-range streaming
    pub streaming_max_bytes: u64,
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self {
            inline_max_bytes: 1536 * 1024,
            streaming_max_bytes: 20 * 1024 * 1024,
        }
    }
}

impl From<&DeliveryConfig> for StrategySelector {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            inline_max_bytes: config.inline_max_bytes,
            streaming_max_bytes: config.streaming_max_bytes.max(config.inline_max_bytes),
        }
    }
}

impl StrategySelector {
    /// Pick a strategy; a forced mode always wins
    pub fn select(&self, size_bytes: u64, forced: Option<DeliveryStrategy>) -> DeliveryStrategy {
        if let Some(strategy) = forced {
            return strategy;
        }

        if size_bytes <= self.inline_max_bytes {
            DeliveryStrategy::Inline
        } else if size_bytes <= self.streaming_max_bytes {
            DeliveryStrategy::Streaming
        } else {
            DeliveryStrategy::Image
        }
    }
}
