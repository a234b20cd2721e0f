//! Calibration gating and Achilles-heel (weakest domain) detection.
//!
//! All functions here are pure: they take per-match domain scores ordered
//! newest first and the thresholds from [`GisConfig`].

use super::scoring::DomainScores;
use super::{alpha_from_half_life, Domain, FeatureMap, NEUTRAL};
use crate::config::GisConfig;
use serde::Serialize;
use std::collections::BTreeMap;

pub const HALF_LIFE_DEFICIT: f64 = 4.0;

/// One processed match as the detector sees it.
#[derive(Debug, Clone, Default)]
pub struct MatchDomains {
    pub match_id: String,
    pub domains: DomainScores,
    pub z: BTreeMap<Domain, FeatureMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CalibrationStage {
    /// Too few ranked matches; nothing is shown.
    Hidden = 0,
    /// Scores visible, diagnosis suppressed.
    ScoresOnly = 1,
    Full = 2,
}

impl CalibrationStage {
    pub fn from_sample_count(count: usize, cfg: &GisConfig) -> Self {
        if count < cfg.min_matches_for_gis {
            CalibrationStage::Hidden
        } else if count < cfg.min_matches_for_focus {
            CalibrationStage::ScoresOnly
        } else {
            CalibrationStage::Full
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

fn deficits(domains: &DomainScores) -> Vec<(Domain, f64)> {
    Domain::ALL
        .iter()
        .map(|d| (*d, domains.get(d).map(|v| v - NEUTRAL).unwrap_or(0.0)))
        .collect()
}

fn sort_ascending(values: &mut [(Domain, f64)]) {
    values.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// EWMA of `inst - 50` per domain over the newest `last_n` matches, applied
/// oldest to newest. A domain's first observation seeds its average.
pub fn deficit_ewma(newest_first: &[MatchDomains], last_n: usize) -> BTreeMap<Domain, f64> {
    let alpha = alpha_from_half_life(HALF_LIFE_DEFICIT);
    let mut agg: BTreeMap<Domain, Option<f64>> = Domain::ALL.iter().map(|d| (*d, None)).collect();

    for m in newest_first.iter().take(last_n).rev() {
        for (domain, inst) in &m.domains {
            let deficit = inst - NEUTRAL;
            let slot = agg.entry(*domain).or_insert(None);
            *slot = Some(match *slot {
                None => deficit,
                Some(prev) => alpha * deficit + (1.0 - alpha) * prev,
            });
        }
    }
    agg.into_iter().map(|(d, v)| (d, v.unwrap_or(0.0))).collect()
}

/// Domains ordered most negative first.
pub fn rank_deficits(ewma: &BTreeMap<Domain, f64>) -> Vec<(Domain, f64)> {
    let mut ordered: Vec<(Domain, f64)> = ewma.iter().map(|(d, v)| (*d, *v)).collect();
    sort_ascending(&mut ordered);
    ordered
}

/// Consecutive newest matches in which `candidate` is the single worst
/// domain with at least `min_lead` points over the runner-up.
pub fn lead_streak(newest_first: &[MatchDomains], candidate: Domain, min_lead: f64) -> usize {
    let mut streak = 0;
    for m in newest_first {
        let mut per_match = deficits(&m.domains);
        sort_ascending(&mut per_match);
        let worst = per_match[0];
        let lead = per_match.get(1).map(|second| second.1 - worst.1).unwrap_or(f64::INFINITY);
        if worst.0 == candidate && lead >= min_lead {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

/// Population standard deviation of the newest `window` instantaneous
/// overall scores.
pub fn confidence_band(inst_overall_newest_first: &[f64], window: usize) -> f64 {
    let recent: Vec<f64> = inst_overall_newest_first.iter().take(window).copied().collect();
    if recent.is_empty() {
        return 0.0;
    }
    let n = recent.len() as f64;
    let mean = recent.iter().sum::<f64>() / n;
    (recent.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Mean of the last five instantaneous overall scores minus the five before.
pub fn delta5(inst_overall_newest_first: &[f64]) -> f64 {
    fn avg(v: &[f64]) -> f64 {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    }
    let last = &inst_overall_newest_first[..inst_overall_newest_first.len().min(5)];
    let prev_end = inst_overall_newest_first.len().min(10);
    let prev = if prev_end > 5 { &inst_overall_newest_first[5..prev_end] } else { &[][..] };
    avg(last) - avg(prev)
}

#[derive(Debug, Clone, Serialize)]
pub struct FocusDebug {
    pub primary_domain: Option<Domain>,
    pub primary_deficit: Option<f64>,
    pub second_deficit: Option<f64>,
    pub lead_over_second: Option<f64>,
    pub streak_matches: usize,
    pub band_width: f64,
    pub eligible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Focus {
    pub primary: Option<Domain>,
    pub secondary: Vec<Domain>,
    pub advice: Option<String>,
    pub deficits: BTreeMap<Domain, f64>,
    pub debug: FocusDebug,
}

pub fn assess_focus(
    newest_first: &[MatchDomains],
    stage: CalibrationStage,
    band: f64,
    cfg: &GisConfig,
) -> Focus {
    let window = &newest_first[..newest_first.len().min(cfg.achilles_window)];
    let ewma = deficit_ewma(window, cfg.achilles_window);
    let ordered = rank_deficits(&ewma);

    let candidate = if window.is_empty() { None } else { ordered.first().copied() };
    let second = ordered.get(1).map(|(_, v)| *v);

    let streak = candidate
        .map(|(d, _)| lead_streak(newest_first, d, cfg.min_primary_lead))
        .unwrap_or(0);

    let eligible = match candidate {
        Some((_, deficit)) => {
            stage == CalibrationStage::Full
                && band <= cfg.max_band_for_focus
                && deficit <= cfg.min_primary_gap
                && streak >= cfg.hysteresis_matches
        }
        None => false,
    };

    let primary = if eligible { candidate.map(|(d, _)| d) } else { None };
    let secondary = if eligible {
        ordered
            .iter()
            .skip(1)
            .take(2)
            .filter(|(_, v)| *v <= cfg.secondary_gap)
            .map(|(d, _)| *d)
            .collect()
    } else {
        Vec::new()
    };
    let advice = primary.and_then(|d| worst_metric(window, d)).and_then(|(d, m)| advice_for(d, &m));

    Focus {
        primary,
        secondary,
        advice: advice.map(str::to_string),
        deficits: ewma,
        debug: FocusDebug {
            primary_domain: candidate.map(|(d, _)| d),
            primary_deficit: candidate.map(|(_, v)| v),
            second_deficit: candidate.and(second),
            lead_over_second: candidate.and_then(|(_, v)| second.map(|s| s - v)),
            streak_matches: streak,
            band_width: band,
            eligible,
        },
    }
}

/// Metric with the lowest mean z inside `domain` across the window.
fn worst_metric(window: &[MatchDomains], domain: Domain) -> Option<(Domain, String)> {
    let mut acc: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for m in window {
        if let Some(z) = m.z.get(&domain) {
            for (metric, v) in z {
                let e = acc.entry(metric.as_str()).or_insert((0.0, 0));
                e.0 += v;
                e.1 += 1;
            }
        }
    }
    acc.into_iter()
        .map(|(m, (sum, n))| (m, sum / n as f64))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(m, _)| (domain, m.to_string()))
}

fn advice_for(domain: Domain, metric: &str) -> Option<&'static str> {
    let tip = match (domain, metric) {
        (Domain::Laning, "csd10") => "CS lead at 10 is below baseline; aim for +12 CS by 15m.",
        (Domain::Laning, "gd10") => "Gold diff at 10 is lagging; manage waves to take plates.",
        (Domain::Laning, "xpd10") => "XP diff at 10 is low; consider safer trades and wave control.",
        (Domain::Laning, "early_deaths_pre10") => "Early deaths pre-10 are frequent; track the jungler and ward river earlier.",
        (Domain::Vision, "vision_per_min") => "Vision/min below baseline; ward on spawn timers and refresh control wards.",
        (Domain::Vision, "wards_killed") => "Few ward clears; buy sweepers and check common ward spots.",
        (Domain::Vision, "ctrl_wards_pre14") => "Low control wards pre-14; buy and place one before 10m.",
        (Domain::Objectives, "obj_participation") => "Low objective presence; rotate earlier to dragons and herald.",
        (Domain::Objectives, "obj_near") => "Far from objectives; hover and set vision 60-90s before spawn.",
        (Domain::Objectives, "kp_early") => "Low early kill participation; join skirmishes around objectives.",
        (Domain::Economy, "csmin14") => "CS/min by 14 is low; focus on last-hitting and safe farm.",
        (Domain::Economy, "gpm") => "Gold/min is low; collect waves between objectives.",
        (Domain::Damage, "dpm") => "Damage/min behind baseline; look for safe DPS windows in fights.",
        (Domain::Damage, "damage_share") => "Low damage share; pick fights where you can contribute safely.",
        (Domain::Discipline, "time_dead_per_min") => "High time dead; choose safer angles and track enemy threats.",
        (Domain::Discipline, "early_deaths_pre10") => "Early deaths; respect wave states and jungler timings.",
        (Domain::Macro, "roam_distance_pre14") => "Roams aren't paying off; balance roams with farm and plates.",
        (Domain::Macro, "obj_near") => "Slow to objectives; rotate earlier and ping the team to group.",
        _ => return None,
    };
    Some(tip)
}
