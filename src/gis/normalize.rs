//! Personal baselines: EWMA mean/variance per metric and the z-scores
//! measured against them.

use super::{alpha_from_half_life, clip, ContextKey, FeatureMap};
use serde::{Deserialize, Serialize};

pub const HALF_LIFE_METRIC: f64 = 6.0;
/// Consistency constant that makes MAD estimate sigma for normal data.
pub const MAD_SCALE: f64 = 1.4826;
const DEGENERATE_Z: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormKey {
    pub player: String,
    pub queue: Option<i32>,
    pub role: Option<String>,
    pub metric: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormState {
    pub mean: f64,
    pub variance: f64,
}

/// Sigma floor tuned to each metric's natural scale.
pub fn metric_epsilon(metric: &str, fallback: f64) -> f64 {
    match metric {
        "gd10" | "xpd10" => 20.0,
        "gd15" | "xpd15" => 25.0,
        "csd10" | "csd14" => 1.0,
        "csmin14" => 0.2,
        "dpm" => 50.0,
        "gpm" => 20.0,
        "damage_share" => 2.0,
        "obj_participation" | "kp_early" => 5.0,
        "obj_near" => 0.5,
        "vision_per_min" => 0.05,
        "wards_killed" | "ctrl_wards_pre14" | "plates_pre14" => 0.2,
        "early_deaths_pre10" => 0.2,
        "time_dead_per_min" => 1.0,
        "mythic_at_s" | "two_item_at_s" => 30.0,
        "roam_distance_pre14" => 200.0,
        _ => fallback,
    }
}

/// Lookup order for a metric's baseline: exact context, then any-queue,
/// then any-role, then the player-wide entry.
pub fn fallback_keys(ctx: &ContextKey, metric: &str) -> Vec<NormKey> {
    let candidates = [
        (ctx.queue, ctx.role.clone()),
        (None, ctx.role.clone()),
        (ctx.queue, None),
        (None, None),
    ];
    let mut keys: Vec<NormKey> = Vec::with_capacity(4);
    for (queue, role) in candidates {
        let key = NormKey {
            player: ctx.player.clone(),
            queue,
            role,
            metric: metric.to_string(),
        };
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

pub fn resolve_baseline<F>(ctx: &ContextKey, metric: &str, lookup: F) -> Option<NormState>
where
    F: Fn(&NormKey) -> Option<NormState>,
{
    fallback_keys(ctx, metric).iter().find_map(|k| lookup(k))
}

#[derive(Debug, Clone, Default)]
pub struct Standardized {
    pub z: FeatureMap,
    /// New baselines to persist under the exact context key.
    pub updates: Vec<(NormKey, NormState)>,
}

/// Scores every metric against the pre-update baseline, then advances the
/// baseline by one EWMA step. Nothing is written; callers commit `updates`.
pub fn standardize<F>(
    ctx: &ContextKey,
    features: &FeatureMap,
    huber_k: f64,
    eps_fallback: f64,
    lookup: F,
) -> Standardized
where
    F: Fn(&NormKey) -> Option<NormState>,
{
    let alpha = alpha_from_half_life(HALF_LIFE_METRIC);
    let mut out = Standardized::default();

    for (metric, &x) in features {
        if !x.is_finite() {
            continue;
        }
        let eps = metric_epsilon(metric, eps_fallback);
        let prior = resolve_baseline(ctx, metric, &lookup).unwrap_or(NormState {
            mean: x,
            variance: eps * eps,
        });

        let sigma = prior.variance.max(0.0).sqrt().max(eps);
        let z = clip((x - prior.mean) / sigma, -huber_k, huber_k);
        out.z.insert(metric.clone(), z);

        let dev = x - prior.mean;
        let next = NormState {
            mean: prior.mean + alpha * dev,
            variance: ((1.0 - alpha) * (prior.variance + alpha * dev * dev)).max(0.0),
        };
        out.updates.push((
            NormKey {
                player: ctx.player.clone(),
                queue: ctx.queue,
                role: ctx.role.clone(),
                metric: metric.clone(),
            },
            next,
        ));
    }
    out
}

/// True when every z is effectively zero, typically a first-ever sample.
pub fn is_degenerate(z: &FeatureMap) -> bool {
    z.values().all(|v| v.abs() < DEGENERATE_Z)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Robust z against historical rows: median and scaled MAD, floored by the
/// metric epsilon. Metrics absent from history keep a z of 0.
pub fn robust_z(
    features: &FeatureMap,
    history: &[FeatureMap],
    huber_k: f64,
    eps_fallback: f64,
) -> FeatureMap {
    let mut out = FeatureMap::new();
    for (metric, &x) in features {
        let baseline: Vec<f64> = history
            .iter()
            .filter_map(|row| row.get(metric).copied())
            .filter(|v| v.is_finite())
            .collect();
        let z = match median(&baseline) {
            Some(med) => {
                let deviations: Vec<f64> = baseline.iter().map(|v| (v - med).abs()).collect();
                let mad = median(&deviations).unwrap_or(0.0);
                let sigma = (MAD_SCALE * mad).max(metric_epsilon(metric, eps_fallback));
                clip((x - med) / sigma, -huber_k, huber_k)
            }
            None => 0.0,
        };
        out.insert(metric.clone(), z);
    }
    out
}
