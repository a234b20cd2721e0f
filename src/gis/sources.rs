//! Seams to the collaborators the engine consumes but does not own.

use super::{FeatureMap, MatchMeta};
use crate::api::models::{ChampionMasteryDto, MatchDto, TimelineDto};
use crate::error::AppError;
use std::sync::Arc;

/// Throttled upstream fetch (possibly cache-backed).
pub trait MatchSource: Send + Sync {
    fn fetch_match(&self, match_id: &str) -> Result<MatchDto, AppError>;
    fn fetch_timeline(&self, match_id: &str) -> Result<TimelineDto, AppError>;
}

pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, game: &MatchDto, timeline: &TimelineDto, puuid: &str) -> Result<(FeatureMap, MatchMeta), AppError>;
}

pub trait MasteryLookup: Send + Sync {
    fn champion_masteries(&self, puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError>;
}

impl<T: MatchSource + ?Sized> MatchSource for Arc<T> {
    fn fetch_match(&self, match_id: &str) -> Result<MatchDto, AppError> {
        (**self).fetch_match(match_id)
    }

    fn fetch_timeline(&self, match_id: &str) -> Result<TimelineDto, AppError> {
        (**self).fetch_timeline(match_id)
    }
}

impl<T: MasteryLookup + ?Sized> MasteryLookup for Arc<T> {
    fn champion_masteries(&self, puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError> {
        (**self).champion_masteries(puuid)
    }
}

/// Used when no mastery data is available; the guardrail never engages.
pub struct NoMastery;

impl MasteryLookup for NoMastery {
    fn champion_masteries(&self, _puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError> {
        Ok(Vec::new())
    }
}

/// Champions in the bottom 20th percentile of mastery points, or at
/// mastery level 4 or lower.
pub fn low_mastery_champions(masteries: &[ChampionMasteryDto]) -> Vec<i64> {
    if masteries.is_empty() {
        return Vec::new();
    }
    let mut points: Vec<i64> = masteries.iter().map(|m| m.champion_points).collect();
    points.sort_unstable();
    let idx = ((0.2 * (points.len() - 1) as f64) as usize).min(points.len() - 1);
    let threshold = points[idx];

    masteries
        .iter()
        .filter(|m| m.champion_level <= 4 || m.champion_points <= threshold)
        .map(|m| m.champion_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mastery(id: i64, level: i32, points: i64) -> ChampionMasteryDto {
        ChampionMasteryDto {
            champion_id: id,
            champion_level: level,
            champion_points: points,
        }
    }

    #[test]
    fn bottom_percentile_and_low_level_are_low() {
        let list: Vec<_> = (1..=11).map(|i| mastery(i, 7, i * 10_000)).chain([mastery(99, 3, 500_000)]).collect();
        let low = low_mastery_champions(&list);
        // 12 entries -> index 2 -> threshold 30_000
        assert_eq!(low, vec![1, 2, 3, 99]);
    }

    #[test]
    fn empty_list_means_no_guardrail() {
        assert!(low_mastery_champions(&[]).is_empty());
    }
}
