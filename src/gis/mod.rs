//! Growth Improvement Score engine.
//!
//! Per-match metrics flow through [`normalize`] (personal z-scores),
//! [`scoring`] (seven domain scores plus the role-weighted overall),
//! [`smoothing`] (reliability-weighted running scores) and finally
//! [`achilles`] (calibration gating and weakest-domain detection).
//! [`engine::GisEngine`] wires these to the store and collaborators.

pub mod achilles;
pub mod engine;
pub mod locks;
pub mod normalize;
pub mod scoring;
pub mod smoothing;
pub mod sources;
pub mod weights;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named numeric metrics extracted from one match.
pub type FeatureMap = BTreeMap<String, f64>;

/// Neutral score; every persisted score starts here.
pub const NEUTRAL: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Laning,
    Economy,
    Damage,
    Objectives,
    Vision,
    Discipline,
    Macro,
}

impl Domain {
    pub const ALL: [Domain; 7] = [
        Domain::Laning,
        Domain::Economy,
        Domain::Damage,
        Domain::Objectives,
        Domain::Vision,
        Domain::Discipline,
        Domain::Macro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Laning => "laning",
            Domain::Economy => "economy",
            Domain::Damage => "damage",
            Domain::Objectives => "objectives",
            Domain::Vision => "vision",
            Domain::Discipline => "discipline",
            Domain::Macro => "macro",
        }
    }

    /// Case-insensitive parse; accepts `Laning` as well as `laning`.
    pub fn parse(raw: &str) -> Option<Domain> {
        let lower = raw.trim().to_ascii_lowercase();
        Domain::ALL.iter().copied().find(|d| d.as_str() == lower)
    }

    pub fn label(&self) -> String {
        let s = self.as_str();
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring context: one player in one (queue, role). `None` means "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKey {
    pub player: String,
    pub queue: Option<i32>,
    pub role: Option<String>,
}

impl ContextKey {
    pub fn new(player: &str, queue: Option<i32>, role: Option<&str>) -> Self {
        ContextKey {
            player: player.to_string(),
            queue,
            role: role.map(|r| r.to_string()),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.player,
            self.queue.map(|q| q.to_string()).unwrap_or_else(|| "*".into()),
            self.role.as_deref().unwrap_or("*")
        )
    }
}

/// Match metadata reported by the feature extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchMeta {
    pub queue_id: i32,
    pub role: Option<String>,
}

/// Per-step smoothing factor for a half-life expressed in matches.
pub fn alpha_from_half_life(half_life: f64) -> f64 {
    1.0 - 0.5_f64.powf(1.0 / half_life.max(1e-6))
}

pub fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

pub fn clamp_score(v: f64) -> f64 {
    clip(v, 0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_life_alpha_halves_weight() {
        let a = alpha_from_half_life(6.0);
        let remaining = (1.0 - a).powi(6);
        assert!((remaining - 0.5).abs() < 1e-12);
    }

    #[test]
    fn domain_parse_is_case_insensitive() {
        assert_eq!(Domain::parse("Vision"), Some(Domain::Vision));
        assert_eq!(Domain::parse("MACRO"), Some(Domain::Macro));
        assert_eq!(Domain::parse("farming"), None);
        assert_eq!(Domain::Objectives.label(), "Objectives");
    }
}
