//! Instantaneous domain and overall scores for a single match.

use super::{clip, Domain, FeatureMap, NEUTRAL};
use std::collections::BTreeMap;

pub type DomainScores = BTreeMap<Domain, f64>;

const Z_CAP: f64 = 3.0;
/// Points per unit of weighted z.
const SCALE: f64 = 10.0;

/// Metric weights feeding each domain. Negative weights mark
/// "lower is better" metrics.
pub fn domain_metric_weights(domain: Domain) -> &'static [(&'static str, f64)] {
    match domain {
        Domain::Laning => &[
            ("gd10", 0.35),
            ("xpd10", 0.25),
            ("csd10", 0.25),
            ("early_deaths_pre10", -0.15),
            ("plates_pre14", 0.10),
        ],
        Domain::Economy => &[
            ("csmin14", 0.40),
            ("gpm", 0.35),
            ("mythic_at_s", -0.15),
            ("two_item_at_s", -0.10),
        ],
        Domain::Damage => &[("dpm", 0.6), ("damage_share", 0.4)],
        Domain::Objectives => &[("obj_participation", 0.60), ("obj_near", 0.25), ("kp_early", 0.15)],
        Domain::Vision => &[("vision_per_min", 0.50), ("wards_killed", 0.25), ("ctrl_wards_pre14", 0.25)],
        Domain::Discipline => &[("time_dead_per_min", -0.70), ("early_deaths_pre10", -0.30)],
        Domain::Macro => &[("roam_distance_pre14", 0.60), ("obj_near", 0.40)],
    }
}

/// Scores one domain; 50 when none of its metrics were observed.
pub fn domain_score(domain: Domain, z: &FeatureMap) -> f64 {
    let mut s = 0.0;
    let mut tw = 0.0;
    for (metric, w) in domain_metric_weights(domain) {
        if let Some(zm) = z.get(*metric) {
            s += w * clip(*zm, -Z_CAP, Z_CAP);
            tw += w.abs();
        }
    }
    if tw <= 0.0 {
        NEUTRAL
    } else {
        NEUTRAL + SCALE * (s / tw)
    }
}

pub fn domain_scores(z: &FeatureMap) -> DomainScores {
    Domain::ALL.iter().map(|d| (*d, domain_score(*d, z))).collect()
}

/// The subset of `z` a domain consumed, kept for drill-down.
pub fn domain_z(domain: Domain, z: &FeatureMap) -> FeatureMap {
    domain_metric_weights(domain)
        .iter()
        .filter_map(|(m, _)| z.get(*m).map(|v| (m.to_string(), *v)))
        .collect()
}

/// Caps each domain's negative deviation at `cap` points below neutral.
pub fn apply_mastery_guardrail(scores: &mut DomainScores, cap: f64) {
    let floor = NEUTRAL - cap.abs();
    for value in scores.values_mut() {
        if *value < floor {
            *value = floor;
        }
    }
}

/// `50 + sum_d (w_d / sum w) * (inst_d - 50)`.
pub fn overall_score(domains: &DomainScores, weights: &BTreeMap<Domain, f64>) -> f64 {
    let total: f64 = weights.values().sum();
    if total <= 0.0 {
        return NEUTRAL;
    }
    weights.iter().fold(NEUTRAL, |acc, (d, w)| match domains.get(d) {
        Some(inst) => acc + (w / total) * (inst - NEUTRAL),
        None => acc,
    })
}
