use super::scoring::DomainScores;
use super::{alpha_from_half_life, clamp_score, clip, NEUTRAL};
use crate::config::{EXCLUDED_QUEUES, QUEUE_RANKED_FLEX, QUEUE_RANKED_SOLO};

pub const HALF_LIFE_DOMAIN: f64 = 8.0;
pub const HALF_LIFE_OVERALL: f64 = 10.0;
/// Largest instantaneous-overall swing a single match may push.
pub const MAX_OVERALL_DELTA: f64 = 6.0;
const FULL_GAME_SECONDS: f64 = 1800.0;
const SECONDARY_QUEUE_FACTOR: f64 = 0.6;

/// How much a match may move the smoothed scores, in [0, 1].
pub fn reliability(duration_s: i64, queue_id: i32) -> f64 {
    if EXCLUDED_QUEUES.contains(&queue_id) {
        return 0.0;
    }
    let mut r = clip(duration_s as f64 / FULL_GAME_SECONDS, 0.0, 1.0);
    if queue_id != QUEUE_RANKED_SOLO && queue_id != QUEUE_RANKED_FLEX {
        r *= SECONDARY_QUEUE_FACTOR;
    }
    r
}

/// Blends instantaneous domain scores into the previous smoothed values.
/// Domains with no previous value start from neutral.
pub fn smooth_domains(prev: &DomainScores, inst: &DomainScores, r: f64) -> DomainScores {
    let alpha = alpha_from_half_life(HALF_LIFE_DOMAIN);
    inst.iter()
        .map(|(d, inst_d)| {
            let p = prev.get(d).copied().unwrap_or(NEUTRAL);
            (*d, clamp_score(p + r * alpha * (inst_d - p)))
        })
        .collect()
}

pub fn smooth_overall(prev: f64, inst_overall: f64, r: f64) -> f64 {
    let alpha = alpha_from_half_life(HALF_LIFE_OVERALL);
    let delta = clip(inst_overall - prev, -MAX_OVERALL_DELTA, MAX_OVERALL_DELTA);
    clamp_score(prev + r * alpha * delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gis::Domain;

    #[test]
    fn reliability_by_duration_and_queue() {
        assert_eq!(reliability(1800, 420), 1.0);
        assert_eq!(reliability(3600, 440), 1.0);
        assert!((reliability(900, 420) - 0.5).abs() < 1e-12);
        assert!((reliability(1800, 400) - 0.6).abs() < 1e-12);
        assert_eq!(reliability(1800, 450), 0.0);
        assert_eq!(reliability(-5, 420), 0.0);
    }

    #[test]
    fn overall_step_is_clamped() {
        let alpha = alpha_from_half_life(HALF_LIFE_OVERALL);
        let next = smooth_overall(50.0, 100.0, 1.0);
        assert!((next - (50.0 + alpha * 6.0)).abs() < 1e-12);
        let next = smooth_overall(50.0, 0.0, 1.0);
        assert!((next - (50.0 - alpha * 6.0)).abs() < 1e-12);
    }

    #[test]
    fn zero_reliability_leaves_scores_unchanged() {
        let prev: DomainScores = [(Domain::Laning, 61.0)].into_iter().collect();
        let inst: DomainScores = [(Domain::Laning, 20.0), (Domain::Vision, 80.0)].into_iter().collect();
        let next = smooth_domains(&prev, &inst, 0.0);
        assert_eq!(next[&Domain::Laning], 61.0);
        assert_eq!(next[&Domain::Vision], 50.0);
        assert_eq!(smooth_overall(55.0, 90.0, 0.0), 55.0);
    }

    #[test]
    fn smoothed_scores_stay_bounded() {
        let mut scores: DomainScores = Domain::ALL.iter().map(|d| (*d, 50.0)).collect();
        let mut overall = 50.0;
        for i in 0..500 {
            let target = if i % 3 == 0 { 0.0 } else { 100.0 };
            let inst: DomainScores = Domain::ALL.iter().map(|d| (*d, target)).collect();
            scores = smooth_domains(&scores, &inst, 1.0);
            overall = smooth_overall(overall, target, 1.0);
            assert!(scores.values().all(|v| (0.0..=100.0).contains(v)));
            assert!((0.0..=100.0).contains(&overall));
        }
    }
}
