// Coherence specifications — how aggressively a proxy keeps its replicas fresh

use super::ProxyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum CoherenceSpecification {
    /// Obtain once, never freshen.
    #[default]
    OneTimeOnly,
    /// Freshen every `period` milliseconds.
    Periodic { period: i64 },
    /// Start at `fallback`, stretch by `factor` while nothing changes, never beyond `max`.
    AdaptivePeriodic { fallback: i64, max: i64, factor: f64 },
}

impl CoherenceSpecification {
    pub fn to_external_form(&self) -> String {
        match self {
            Self::OneTimeOnly => "one-time-only".to_string(),
            Self::Periodic { period } => format!("periodic:{period}"),
            Self::AdaptivePeriodic { fallback, max, factor } => {
                format!("adaptive-periodic:{fallback}:{max}:{factor}")
            }
        }
    }

    pub fn from_external_form(raw: &str) -> Result<Self, ProxyError> {
        let invalid = || ProxyError::InvalidCoherence(raw.to_string());
        let parts: Vec<&str> = raw.trim().split(':').collect();
        let millis = |s: &str| s.parse::<i64>().ok().filter(|v| *v > 0).ok_or_else(invalid);

        match parts.as_slice() {
            ["one-time-only"] => Ok(Self::OneTimeOnly),
            ["periodic", period] => Ok(Self::Periodic { period: millis(*period)? }),
            ["adaptive-periodic", fallback, max, factor] => {
                let fallback = millis(*fallback)?;
                let max = millis(*max)?;
                let factor = factor
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 1.0)
                    .ok_or_else(invalid)?;
                if max < fallback {
                    return Err(invalid());
                }
                Ok(Self::AdaptivePeriodic { fallback, max, factor })
            }
            _ => Err(invalid()),
        }
    }

    pub fn is_periodic(&self) -> bool {
        !matches!(self, Self::OneTimeOnly)
    }

    /// Delay until the next freshen, given the delay used last time (if any) and
    /// whether the replicas changed since. `None` means never.
    pub fn next_freshen_delay(&self, previous: Option<i64>, changed: bool) -> Option<i64> {
        match *self {
            Self::OneTimeOnly => None,
            Self::Periodic { period } => Some(period),
            Self::AdaptivePeriodic { fallback, max, factor } => match previous {
                Some(previous) if !changed => {
                    let stretched = (previous as f64 * factor).round() as i64;
                    Some(stretched.clamp(fallback, max))
                }
                _ => Some(fallback),
            },
        }
    }
}

impl fmt::Display for CoherenceSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_external_form())
    }
}

impl FromStr for CoherenceSpecification {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_form(s)
    }
}

impl TryFrom<String> for CoherenceSpecification {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_external_form(&value)
    }
}

impl From<CoherenceSpecification> for String {
    fn from(value: CoherenceSpecification) -> Self {
        value.to_external_form()
    }
}
