use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};

/// Upper bound on link bandwidth, in Mbit/s.
pub const MAX_BANDWIDTH_MBIT: f64 = 1000.0;

/// Identity of a link: the unordered pair of endpoint ids.
///
/// Stored normalized (lexicographically smaller id first), so `(a, b)` and
/// `(b, a)` compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    lo: String,
    hi: String,
}

impl LinkKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                lo: a.to_string(),
                hi: b.to_string(),
            }
        } else {
            Self {
                lo: b.to_string(),
                hi: a.to_string(),
            }
        }
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.lo, &self.hi)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lo == id || self.hi == id
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.lo == id {
            Some(&self.hi)
        } else if self.hi == id {
            Some(&self.lo)
        } else {
            None
        }
    }

    pub fn is_loop(&self) -> bool {
        self.lo == self.hi
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.lo, self.hi)
    }
}

/// Traffic shaping for a link. Options are kept even while `enabled` is
/// false; only enabled links are shaped by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOptions {
    /// Bandwidth in Mbit/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f64>,
    /// One-way delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    /// Delay variation in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,
    /// Loss in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f32>,
    /// Queue limit in packets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<u32>,
    #[serde(default)]
    pub enabled: bool,
}

impl LinkOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(bw) = self.bandwidth
            && !(bw > 0.0 && bw <= MAX_BANDWIDTH_MBIT)
        {
            return Err(TopologyError::Validation(format!(
                "bandwidth {bw} must be in (0, {MAX_BANDWIDTH_MBIT}] Mbit/s"
            )));
        }
        if let Some(loss) = self.loss
            && !(0.0..=100.0).contains(&loss)
        {
            return Err(TopologyError::Validation(format!(
                "loss {loss} must be in [0, 100] percent"
            )));
        }
        if self.jitter.is_some() && self.delay.is_none() {
            return Err(TopologyError::Validation(
                "jitter requires a delay".to_string(),
            ));
        }
        if self.max_queue_size == Some(0) {
            return Err(TopologyError::Validation(
                "max queue size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// True when the engine has something to apply.
    pub fn is_shaped(&self) -> bool {
        self.enabled
            && (self.bandwidth.is_some()
                || self.delay.is_some()
                || self.loss.is_some()
                || self.max_queue_size.is_some())
    }
}

/// A declared link.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub key: LinkKey,
    pub options: LinkOptions,
}
