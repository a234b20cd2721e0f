//! Match processing: the ranked smoothing pipeline, the compute-on-open
//! path, summaries and rebuilds, over an injected store and collaborators.

use super::achilles::{self, CalibrationStage, FocusDebug, MatchDomains};
use super::locks::{KeyedLocks, WaitOutcome};
use super::normalize::{self, Standardized};
use super::scoring::{self, DomainScores};
use super::smoothing;
use super::sources::{low_mastery_champions, FeatureExtractor, MasteryLookup, MatchSource, NoMastery};
use super::weights::{canonical_role, RawRoleWeights, RoleWeights, WeightsStore};
use super::{ContextKey, Domain, FeatureMap, NEUTRAL};
use crate::config::{GisConfig, EXCLUDED_QUEUES, QUEUE_RANKED_SOLO};
use crate::error::AppError;
use crate::features::TimelineExtractor;
use crate::store::{
    ClearScope, ContribOrigin, DomainContribution, FeatureRow, MatchContribution, MatchRecord, MatchWrite,
    PatchEaseState, Store,
};
use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const HISTORY_ROWS: usize = 50;
const ROLE_DETECT_MATCHES: usize = 10;
const RECENT_LIMIT: usize = 100;
const LOCK_POLL: Duration = Duration::from_millis(100);
const SCHEMA_VERSION: &str = "gis.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyProcessed,
    NotRanked,
    NoReliability,
}

/// What one ranked-pipeline step did to the context's scores.
#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub match_id: String,
    pub context: ContextKey,
    pub reliability: f64,
    pub huber_k: f64,
    pub low_mastery: bool,
    pub inst_domains: DomainScores,
    pub inst_overall: f64,
    pub domains: DomainScores,
    pub overall: f64,
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Scored(Box<Contribution>),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn merge(mut self, other: BatchReport) -> Self {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildReport {
    pub contexts: usize,
    pub matches: usize,
    pub first_pass: BatchReport,
    pub second_pass: BatchReport,
}

/// Per-match drill-down; `z` is flattened as `domain.metric`.
#[derive(Debug, Clone, Serialize)]
pub struct MatchBreakdown {
    pub match_id: String,
    pub origin: ContribOrigin,
    pub domains: DomainScores,
    pub overall_inst: f64,
    pub z: BTreeMap<String, f64>,
    pub computed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryContext {
    pub queue: Option<i32>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GisSummary {
    pub schema_version: &'static str,
    pub context: SummaryContext,
    pub overall: f64,
    pub domains: DomainScores,
    pub delta5: f64,
    pub confidence_band: f64,
    pub sample_count: usize,
    pub calibration_stage: u8,
    pub gis_visible: bool,
    pub achilles_eligible: bool,
    pub secondary_eligible: bool,
    pub primary: Option<Domain>,
    pub secondary: Vec<Domain>,
    pub advice: Option<String>,
    pub deficits: BTreeMap<Domain, f64>,
    pub focus_debug: FocusDebug,
}

/// Raw metrics for one match and the context the extractor placed it in.
struct Extracted {
    record: MatchRecord,
    context: ContextKey,
    features: FeatureMap,
}

/// Scored but not yet committed.
struct Scored {
    record: MatchRecord,
    context: ContextKey,
    features: FeatureMap,
    standardized: Standardized,
    inst: DomainScores,
    low_mastery: bool,
}

pub struct GisEngine {
    store: Store,
    config: GisConfig,
    weights: WeightsStore,
    admin: bool,
    source: Box<dyn MatchSource>,
    extractor: Box<dyn FeatureExtractor>,
    mastery: Box<dyn MasteryLookup>,
    context_locks: KeyedLocks<ContextKey>,
    match_locks: KeyedLocks<(String, String)>,
}

impl GisEngine {
    pub fn new(store: Store, config: GisConfig, weights: WeightsStore, source: Box<dyn MatchSource>) -> Self {
        GisEngine {
            store,
            config,
            weights,
            admin: false,
            source,
            extractor: Box::new(TimelineExtractor),
            mastery: Box::new(NoMastery),
            context_locks: KeyedLocks::new(),
            match_locks: KeyedLocks::new(),
        }
    }

    #[cfg(test)]
    pub fn with_extractor(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_mastery(mut self, mastery: Box<dyn MasteryLookup>) -> Self {
        self.mastery = mastery;
        self
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Adds a match to the registry that drives ordering and sample counts.
    pub fn register_match(&self, record: MatchRecord) -> Result<(), AppError> {
        self.store.upsert_match(record)
    }

    /// Registry row for `match_id`, fetching and registering it on a miss.
    pub fn ensure_registered(&self, player: &str, match_id: &str) -> Result<MatchRecord, AppError> {
        if let Some(record) = self.store.match_record(match_id, player) {
            return Ok(record);
        }
        let game = self.source.fetch_match(match_id)?;
        let record = MatchRecord::from_dto(&game, player)
            .ok_or_else(|| AppError::extraction(match_id, "player did not take part in this match"))?;
        self.store.upsert_match(record.clone())?;
        Ok(record)
    }

    fn is_low_mastery(&self, puuid: &str, champion_id: i64) -> bool {
        let low = match self.store.low_mastery(puuid) {
            Some(cached) => cached,
            None => match self.mastery.champion_masteries(puuid) {
                Ok(masteries) => {
                    let low = low_mastery_champions(&masteries);
                    if let Err(e) = self.store.set_low_mastery(puuid, low.clone()) {
                        warn!(error = %e, "failed to cache mastery classification");
                    }
                    low
                }
                Err(e) => {
                    warn!(error = %e, "mastery lookup failed; guardrail disabled for this match");
                    return false;
                }
            },
        };
        low.contains(&champion_id)
    }

    fn extract(&self, record: MatchRecord) -> Result<Extracted, AppError> {
        let game = self.source.fetch_match(&record.match_id)?;
        let timeline = self.source.fetch_timeline(&record.match_id)?;
        let (features, meta) = self.extractor.extract(&game, &timeline, &record.puuid)?;
        let context = ContextKey::new(&record.puuid, Some(meta.queue_id), meta.role.as_deref());
        Ok(Extracted {
            record,
            context,
            features,
        })
    }

    /// Scores against current baselines. Callers hold the context lock
    /// from here until the commit.
    fn score(&self, extracted: Extracted, huber_k: f64) -> Scored {
        let Extracted {
            record,
            context,
            features,
        } = extracted;
        let standardized = normalize::standardize(&context, &features, huber_k, self.config.eps_sigma, |key| {
            self.store.norm_state(key)
        });

        let mut inst = scoring::domain_scores(&standardized.z);
        let low_mastery = record.champion_id != 0 && self.is_low_mastery(&record.puuid, record.champion_id);
        if low_mastery {
            scoring::apply_mastery_guardrail(&mut inst, self.config.max_negative_impact_low_mastery);
        }

        Scored {
            record,
            context,
            features,
            standardized,
            inst,
            low_mastery,
        }
    }

    fn feature_row(scored: &Scored) -> FeatureRow {
        FeatureRow {
            match_id: scored.record.match_id.clone(),
            puuid: scored.record.puuid.clone(),
            queue_id: scored.context.queue.unwrap_or(scored.record.queue_id),
            role: scored.context.role.clone(),
            game_creation_ms: scored.record.game_creation_ms,
            metrics: scored.features.clone(),
        }
    }

    fn contribution_row(record: &MatchRecord, origin: ContribOrigin, inst: &DomainScores, z: &FeatureMap) -> MatchContribution {
        MatchContribution {
            match_id: record.match_id.clone(),
            puuid: record.puuid.clone(),
            origin,
            computed_at: Utc::now(),
            domains: inst
                .iter()
                .map(|(d, score)| {
                    (
                        *d,
                        DomainContribution {
                            inst_score: *score,
                            z_metrics: scoring::domain_z(*d, z),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Ranked pipeline step. Matches outside the ranked queues, or with
    /// zero reliability, are deliberate no-ops. A failure before the commit
    /// leaves every persisted score and baseline untouched.
    pub fn process_match(&self, player: &str, match_id: &str) -> Result<MatchOutcome, AppError> {
        let record = self.ensure_registered(player, match_id)?;
        if !self.config.is_ranked(record.queue_id) || EXCLUDED_QUEUES.contains(&record.queue_id) {
            return Ok(MatchOutcome::Skipped(SkipReason::NotRanked));
        }
        let r = smoothing::reliability(record.duration_s, record.queue_id);
        if r <= 0.0 {
            return Ok(MatchOutcome::Skipped(SkipReason::NoReliability));
        }

        if self.store.has_pipeline_contribution(match_id, player) {
            return Ok(MatchOutcome::Skipped(SkipReason::AlreadyProcessed));
        }

        let extracted = self.extract(record)?;
        let context = extracted.context.clone();
        let _guard = self.context_locks.lock(context.clone());
        if self.store.has_pipeline_contribution(match_id, player) {
            return Ok(MatchOutcome::Skipped(SkipReason::AlreadyProcessed));
        }

        let patch = &extracted.record.patch;
        let mut ease = match self.store.patch_ease(&context) {
            Some(state) if &state.patch == patch => state,
            _ => PatchEaseState {
                patch: patch.clone(),
                remaining: self.config.patch_ease_matches,
            },
        };
        let huber_k = if ease.remaining > 0 {
            ease.remaining -= 1;
            self.config.patch_huber_k
        } else {
            self.config.huber_k
        };

        let scored = self.score(extracted, huber_k);

        let prev_domains = self.store.domain_scores(&context);
        let domains = smoothing::smooth_domains(&prev_domains, &scored.inst, r);
        let role_weights = self.weights.effective().for_role(context.role.as_deref());
        let inst_overall = scoring::overall_score(&scored.inst, &role_weights);
        let prev_overall = self.store.overall_score(&context).unwrap_or(NEUTRAL);
        let overall = smoothing::smooth_overall(prev_overall, inst_overall, r);

        let write = MatchWrite {
            norm: scored.standardized.updates.clone(),
            patch_ease: Some((context.clone(), ease)),
            domain_scores: Some((context.clone(), domains.clone())),
            overall: Some((context.clone(), overall)),
            contribution: Some(Self::contribution_row(
                &scored.record,
                ContribOrigin::Pipeline,
                &scored.inst,
                &scored.standardized.z,
            )),
            features: Some(Self::feature_row(&scored)),
        };
        self.store.commit(write)?;

        debug!(match_id, context = %context, r, inst_overall, overall, "match scored");
        Ok(MatchOutcome::Scored(Box::new(Contribution {
            match_id: match_id.to_string(),
            context,
            reliability: r,
            huber_k,
            low_mastery: scored.low_mastery,
            inst_domains: scored.inst,
            inst_overall,
            domains,
            overall,
        })))
    }

    fn run_batch(&self, player: &str, records: &[MatchRecord]) -> BatchReport {
        let mut report = BatchReport::default();
        for record in records {
            match self.process_match(player, &record.match_id) {
                Ok(MatchOutcome::Scored(_)) => report.processed += 1,
                Ok(MatchOutcome::Skipped(_)) => report.skipped += 1,
                Err(e) => {
                    warn!(match_id = %record.match_id, error = %e, "skipping match");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Processes every registered match without a pipeline contribution,
    /// oldest first.
    pub fn process_new_matches(&self, player: &str, queue: Option<i32>) -> BatchReport {
        let pending: Vec<MatchRecord> = self
            .store
            .matches_chronological(player, queue)
            .into_iter()
            .filter(|m| !self.store.has_pipeline_contribution(&m.match_id, player))
            .collect();
        let batch = self.store.deferred();
        let report = self.run_batch(player, &pending);
        if let Err(e) = batch.finish() {
            warn!(error = %e, "failed to persist processed matches");
        }
        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "processed new matches"
        );
        report
    }

    fn breakdown(&self, record: Option<&MatchRecord>, contribution: &MatchContribution, computed: bool) -> MatchBreakdown {
        let domains = contribution.inst_scores();
        let role = record.and_then(|r| r.role.as_deref());
        let overall_inst = scoring::overall_score(&domains, &self.weights.effective().for_role(role));
        let z = contribution
            .domains
            .iter()
            .flat_map(|(d, c)| c.z_metrics.iter().map(move |(m, v)| (format!("{}.{}", d, m), *v)))
            .collect();
        MatchBreakdown {
            match_id: contribution.match_id.clone(),
            origin: contribution.origin,
            domains,
            overall_inst,
            z,
            computed,
        }
    }

    /// Read-only drill-down of a persisted contribution.
    pub fn match_contribution(&self, player: &str, match_id: &str) -> Option<MatchBreakdown> {
        let contribution = self.store.contribution(match_id, player)?;
        let record = self.store.match_record(match_id, player);
        Some(self.breakdown(record.as_ref(), &contribution, false))
    }

    /// Per-match scores without queue or calibration gating. Never touches
    /// smoothed scores. Concurrent callers for the same match share one
    /// computation, waiting at most `lock_wait_secs` for it.
    pub fn compute_on_open(&self, player: &str, match_id: &str, force: bool) -> Result<MatchBreakdown, AppError> {
        if !force {
            if let Some(cached) = self.match_contribution(player, match_id) {
                return Ok(cached);
            }
        }

        let key = (match_id.to_string(), player.to_string());
        let timeout = Duration::from_secs(self.config.lock_wait_secs);
        let _guard = match self.match_locks.acquire_or_wait(key, timeout, LOCK_POLL, || {
            !force && self.store.contribution(match_id, player).is_some()
        }) {
            WaitOutcome::Acquired(guard) => Some(guard),
            WaitOutcome::Ready => {
                if let Some(cached) = self.match_contribution(player, match_id) {
                    return Ok(cached);
                }
                None
            }
            WaitOutcome::TimedOut => {
                warn!(match_id, "lock wait timed out; computing without exclusivity");
                None
            }
        };
        if !force {
            if let Some(cached) = self.match_contribution(player, match_id) {
                return Ok(cached);
            }
        }

        let record = self.ensure_registered(player, match_id)?;
        let extracted = self.extract(record)?;
        let _context_guard = self.context_locks.lock(extracted.context.clone());
        let scored = self.score(extracted, self.config.huber_k);

        let mut z = scored.standardized.z.clone();
        let mut inst = scored.inst.clone();
        if normalize::is_degenerate(&z) {
            let ctx = &scored.context;
            let mut history =
                self.store
                    .feature_history(player, ctx.queue, ctx.role.as_deref(), match_id, HISTORY_ROWS);
            if history.is_empty() {
                history = self.store.feature_history(player, None, None, match_id, HISTORY_ROWS);
            }
            if !history.is_empty() {
                debug!(match_id, rows = history.len(), "degenerate z; using robust baseline");
                z = normalize::robust_z(&scored.features, &history, self.config.huber_k, self.config.eps_sigma);
                inst = scoring::domain_scores(&z);
                if scored.low_mastery {
                    scoring::apply_mastery_guardrail(&mut inst, self.config.max_negative_impact_low_mastery);
                }
            }
        }

        // A forced recompute must not reopen a match the pipeline already smoothed.
        let origin = if self.store.has_pipeline_contribution(match_id, player) {
            ContribOrigin::Pipeline
        } else {
            ContribOrigin::OnDemand
        };
        let contribution = Self::contribution_row(&scored.record, origin, &inst, &z);
        let write = MatchWrite {
            norm: scored.standardized.updates.clone(),
            contribution: Some(contribution.clone()),
            features: Some(Self::feature_row(&scored)),
            ..MatchWrite::default()
        };
        self.store.commit(write)?;

        Ok(self.breakdown(Some(&scored.record), &contribution, true))
    }

    fn resolve_role(&self, player: &str, queue: Option<i32>, role: Option<&str>) -> Option<String> {
        match role {
            Some(r) => Some(canonical_role(r)),
            None => self
                .store
                .dominant_role(player, queue, &self.config.ranked_queues, ROLE_DETECT_MATCHES),
        }
    }

    pub fn summary(&self, player: &str, queue: Option<i32>, role: Option<&str>) -> GisSummary {
        let cfg = &self.config;
        let queue = queue.or_else(|| cfg.ranked_queues.first().copied()).or(Some(QUEUE_RANKED_SOLO));
        let role = self.resolve_role(player, queue, role);
        let ctx = ContextKey::new(player, queue, role.as_deref());

        let overall = self.store.overall_score(&ctx).unwrap_or(NEUTRAL);
        let smoothed = self.store.domain_scores(&ctx);
        let domains: DomainScores = Domain::ALL
            .iter()
            .map(|d| (*d, smoothed.get(d).copied().unwrap_or(NEUTRAL)))
            .collect();

        let role_weights = self.weights.effective().for_role(role.as_deref());
        let recent: Vec<MatchDomains> = self
            .store
            .recent_contributions(player, queue, role.as_deref(), &cfg.ranked_queues, RECENT_LIMIT)
            .into_iter()
            .map(|(_, c)| MatchDomains {
                match_id: c.match_id.clone(),
                domains: c.inst_scores(),
                z: c.domains.iter().map(|(d, dc)| (*d, dc.z_metrics.clone())).collect(),
            })
            .collect();
        let inst_overall: Vec<f64> = recent
            .iter()
            .map(|m| scoring::overall_score(&m.domains, &role_weights))
            .collect();

        let band = achilles::confidence_band(&inst_overall, cfg.band_window);
        let delta5 = achilles::delta5(&inst_overall);
        let sample_count = self
            .store
            .count_ranked(player, queue, role.as_deref(), &cfg.ranked_queues);
        let stage = CalibrationStage::from_sample_count(sample_count, cfg);
        let focus = achilles::assess_focus(&recent, stage, band, cfg);
        let secondary_eligible = stage == CalibrationStage::Full;

        debug!(context = %ctx, stage = stage.as_u8(), band, sample_count, "summary");
        GisSummary {
            schema_version: SCHEMA_VERSION,
            context: SummaryContext { queue, role },
            overall,
            domains,
            delta5,
            confidence_band: band,
            sample_count,
            calibration_stage: stage.as_u8(),
            gis_visible: stage != CalibrationStage::Hidden,
            achilles_eligible: focus.debug.eligible,
            secondary_eligible,
            primary: focus.primary,
            secondary: focus.secondary,
            advice: focus.advice,
            deficits: focus.deficits,
            focus_debug: focus.debug,
        }
    }

    fn rebuild_context(&self, player: &str, ctx: &ContextKey, records: &[MatchRecord]) -> (BatchReport, BatchReport) {
        let first = self.run_batch(player, records);
        // Second pass rescoring the earliest matches against warmed baselines.
        let cleared = {
            let _guard = self.context_locks.lock(ctx.clone());
            self.store.clear(ClearScope::Context(ctx), true)
        };
        if let Err(e) = cleared {
            warn!(context = %ctx, error = %e, "failed to reset context before second pass");
            return (first, BatchReport::default());
        }
        let second = self.run_batch(player, records);
        (first, second)
    }

    /// Replays a player's ranked history in two chronological passes.
    /// Independent (queue, role) contexts run in parallel.
    pub fn rebuild_all(&self, player: &str, queue: Option<i32>, clear: bool) -> Result<RebuildReport, AppError> {
        let batch = self.store.deferred();
        if clear {
            let removed = self.store.clear(ClearScope::Player { player, queue }, false)?;
            info!(removed, "cleared persisted scores");
        }

        let mut groups: BTreeMap<ContextKey, Vec<MatchRecord>> = BTreeMap::new();
        for record in self.store.matches_chronological(player, queue) {
            if self.config.is_ranked(record.queue_id) && !EXCLUDED_QUEUES.contains(&record.queue_id) {
                groups.entry(record.context()).or_default().push(record);
            }
        }
        let groups: Vec<(ContextKey, Vec<MatchRecord>)> = groups.into_iter().collect();

        let (first_pass, second_pass) = groups
            .par_iter()
            .map(|(ctx, records)| self.rebuild_context(player, ctx, records))
            .reduce(
                || (BatchReport::default(), BatchReport::default()),
                |a, b| (a.0.merge(b.0), a.1.merge(b.1)),
            );

        let report = RebuildReport {
            contexts: groups.len(),
            matches: groups.iter().map(|(_, r)| r.len()).sum(),
            first_pass,
            second_pass,
        };
        batch.finish()?;
        info!(contexts = report.contexts, matches = report.matches, "rebuild finished");
        Ok(report)
    }

    pub fn role_weights(&self) -> RawRoleWeights {
        self.weights.effective().to_api()
    }

    pub fn put_role_weights(&self, raw: &RawRoleWeights) -> Result<RoleWeights, AppError> {
        self.weights.put(raw, self.admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{ChampionMasteryDto, MatchDto, ParticipantDto, TimelineDto};
    use crate::gis::normalize::NormKey;
    use crate::gis::MatchMeta;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    const PLAYER: &str = "p1";

    fn game(id: &str, ms: i64, queue: i32, role: &str) -> MatchDto {
        let mut dto = MatchDto::default();
        dto.metadata.match_id = id.to_string();
        dto.info.queue_id = queue;
        dto.info.game_duration = 1800;
        dto.info.game_creation = ms;
        dto.info.game_version = "14.1.555.1".to_string();
        dto.info.participants = vec![ParticipantDto {
            puuid: PLAYER.to_string(),
            participant_id: 1,
            champion_id: 7,
            team_position: role.to_string(),
            ..Default::default()
        }];
        dto
    }

    #[derive(Default)]
    struct FakeSource {
        games: HashMap<String, MatchDto>,
        fetches: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl MatchSource for FakeSource {
        fn fetch_match(&self, match_id: &str) -> Result<MatchDto, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.games
                .get(match_id)
                .cloned()
                .ok_or_else(|| AppError::MatchNotFound(match_id.to_string()))
        }

        fn fetch_timeline(&self, match_id: &str) -> Result<TimelineDto, AppError> {
            if self.games.contains_key(match_id) {
                Ok(TimelineDto::default())
            } else {
                Err(AppError::MatchNotFound(match_id.to_string()))
            }
        }
    }

    #[derive(Default)]
    struct FakeExtractor {
        features: HashMap<String, FeatureMap>,
        broken: HashSet<String>,
        reported_role: Option<String>,
    }

    impl FeatureExtractor for FakeExtractor {
        fn extract(&self, game: &MatchDto, _timeline: &TimelineDto, puuid: &str) -> Result<(FeatureMap, MatchMeta), AppError> {
            let id = &game.metadata.match_id;
            if self.broken.contains(id) {
                return Err(AppError::extraction(id, "timeline has no frames"));
            }
            let me = game.info.participants.iter().find(|p| p.puuid == puuid);
            let meta = MatchMeta {
                queue_id: game.info.queue_id,
                role: self.reported_role.clone().or_else(|| me.map(|p| p.team_position.clone())),
            };
            Ok((self.features.get(id).cloned().unwrap_or_default(), meta))
        }
    }

    struct LowMastery;

    impl MasteryLookup for LowMastery {
        fn champion_masteries(&self, _puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError> {
            Ok(vec![ChampionMasteryDto {
                champion_id: 7,
                champion_level: 2,
                champion_points: 1_000,
            }])
        }
    }

    /// Masteries are slow to answer and then fail, so every score call
    /// spends a while between reading and writing baselines.
    struct SlowMastery;

    impl MasteryLookup for SlowMastery {
        fn champion_masteries(&self, _puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError> {
            thread::sleep(Duration::from_millis(300));
            Err(AppError::HttpError("mastery service unavailable".to_string()))
        }
    }

    fn metrics(gd10: f64, vision: f64) -> FeatureMap {
        [("gd10".to_string(), gd10), ("vision_per_min".to_string(), vision)]
            .into_iter()
            .collect()
    }

    struct Fixture {
        games: Vec<MatchDto>,
        features: HashMap<String, FeatureMap>,
        broken: HashSet<String>,
        delay: Duration,
        reported_role: Option<String>,
    }

    impl Fixture {
        /// `n` ranked solo matches in MIDDLE, one minute apart.
        fn ranked(n: usize) -> Self {
            let mut fx = Fixture {
                games: Vec::new(),
                features: HashMap::new(),
                broken: HashSet::new(),
                delay: Duration::ZERO,
                reported_role: None,
            };
            for i in 0..n {
                let id = format!("NA1_{}", i);
                fx.features
                    .insert(id.clone(), metrics(100.0 * ((i % 3) as f64 - 1.0), 1.0 + 0.1 * i as f64));
                fx.games.push(game(&id, 60_000 * i as i64, 420, "MIDDLE"));
            }
            fx
        }

        fn engine(self, dir: &tempfile::TempDir) -> (GisEngine, Arc<AtomicUsize>) {
            let fetches = Arc::new(AtomicUsize::new(0));
            let source = FakeSource {
                games: self.games.iter().map(|g| (g.metadata.match_id.clone(), g.clone())).collect(),
                fetches: Arc::clone(&fetches),
                delay: self.delay,
            };
            let extractor = FakeExtractor {
                features: self.features,
                broken: self.broken,
                reported_role: self.reported_role,
            };
            let engine = GisEngine::new(
                Store::in_memory(),
                GisConfig::default(),
                WeightsStore::new(dir.path().join("weights.json")),
                Box::new(source),
            )
            .with_extractor(Box::new(extractor));
            for g in &self.games {
                if let Some(record) = MatchRecord::from_dto(g, PLAYER) {
                    engine.register_match(record).unwrap();
                }
            }
            (engine, fetches)
        }
    }

    fn middle() -> ContextKey {
        ContextKey::new(PLAYER, Some(420), Some("MIDDLE"))
    }

    fn norm_key(metric: &str) -> NormKey {
        NormKey {
            player: PLAYER.to_string(),
            queue: Some(420),
            role: Some("MIDDLE".to_string()),
            metric: metric.to_string(),
        }
    }

    fn huber_k(outcome: MatchOutcome) -> f64 {
        match outcome {
            MatchOutcome::Scored(c) => c.huber_k,
            MatchOutcome::Skipped(reason) => panic!("unexpected skip: {:?}", reason),
        }
    }

    #[test]
    fn second_process_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Fixture::ranked(3).engine(&dir);
        engine.process_new_matches(PLAYER, None);
        let overall = engine.store().overall_score(&middle());
        let domains = engine.store().domain_scores(&middle());

        let again = engine.process_match(PLAYER, "NA1_2").unwrap();
        assert!(matches!(again, MatchOutcome::Skipped(SkipReason::AlreadyProcessed)));
        assert_eq!(engine.store().overall_score(&middle()), overall);
        assert_eq!(engine.store().domain_scores(&middle()), domains);
    }

    #[test]
    fn replay_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = Fixture::ranked(9).engine(&dir);
        let (b, _) = Fixture::ranked(9).engine(&dir);
        a.process_new_matches(PLAYER, None);
        b.process_new_matches(PLAYER, None);
        assert_eq!(a.store().overall_score(&middle()), b.store().overall_score(&middle()));
        assert_eq!(a.store().domain_scores(&middle()), b.store().domain_scores(&middle()));
        for metric in ["gd10", "vision_per_min"] {
            let state = a.store().norm_state(&norm_key(metric));
            assert!(state.is_some());
            assert_eq!(state, b.store().norm_state(&norm_key(metric)));
        }
        let s = a.summary(PLAYER, Some(420), Some("MIDDLE"));
        for v in s.domains.values().chain(std::iter::once(&s.overall)) {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn excluded_and_unranked_queues_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(0);
        fx.games.push(game("ARAM_1", 1, 450, ""));
        fx.games.push(game("NORM_1", 2, 400, "TOP"));
        let (engine, _) = fx.engine(&dir);
        assert!(matches!(
            engine.process_match(PLAYER, "ARAM_1").unwrap(),
            MatchOutcome::Skipped(SkipReason::NotRanked)
        ));
        assert!(matches!(
            engine.process_match(PLAYER, "NORM_1").unwrap(),
            MatchOutcome::Skipped(SkipReason::NotRanked)
        ));
    }

    #[test]
    fn low_mastery_guardrail_floors_domains() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(2);
        fx.features.insert("NA1_0".into(), metrics(0.0, 1.0));
        fx.features.insert("NA1_1".into(), metrics(-5_000.0, 1.0));
        let (engine, _) = fx.engine(&dir);
        let engine = engine.with_mastery(Box::new(LowMastery));

        engine.process_new_matches(PLAYER, None);
        let c = engine.store().contribution("NA1_1", PLAYER).unwrap();
        let laning = c.domains[&Domain::Laning].inst_score;
        assert_eq!(laning, 47.0);
        assert!(c.inst_scores().values().all(|v| *v >= 47.0));
    }

    #[test]
    fn without_guardrail_the_outlier_shows() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(2);
        fx.features.insert("NA1_0".into(), metrics(0.0, 1.0));
        fx.features.insert("NA1_1".into(), metrics(-5_000.0, 1.0));
        let (engine, _) = fx.engine(&dir);
        engine.process_new_matches(PLAYER, None);
        let c = engine.store().contribution("NA1_1", PLAYER).unwrap();
        assert!(c.domains[&Domain::Laning].inst_score < 47.0);
    }

    #[test]
    fn calibration_stages_follow_sample_count() {
        let dir = tempfile::tempdir().unwrap();
        for (n, stage) in [(4, 0), (6, 1), (8, 2)] {
            let (engine, _) = Fixture::ranked(n).engine(&dir);
            engine.process_new_matches(PLAYER, None);
            let s = engine.summary(PLAYER, Some(420), None);
            assert_eq!(s.sample_count, n);
            assert_eq!(s.calibration_stage, stage);
            assert_eq!(s.gis_visible, stage > 0);
            if stage < 2 {
                assert!(!s.achilles_eligible);
                assert!(s.primary.is_none());
            }
            assert_eq!(s.context.role.as_deref(), Some("MIDDLE"));
        }
    }

    #[test]
    fn failing_match_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(4);
        fx.broken.insert("NA1_1".into());
        let (engine, _) = fx.engine(&dir);

        let report = engine.process_new_matches(PLAYER, None);
        assert_eq!(report, BatchReport { processed: 3, skipped: 0, failed: 1 });
        assert!(engine.store().contribution("NA1_1", PLAYER).is_none());
        assert!(engine.store().has_pipeline_contribution("NA1_2", PLAYER));
    }

    #[test]
    fn on_demand_caches_and_force_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, fetches) = Fixture::ranked(1).engine(&dir);

        let first = engine.compute_on_open(PLAYER, "NA1_0", false).unwrap();
        assert!(first.computed);
        assert_eq!(first.origin, ContribOrigin::OnDemand);
        let cached = engine.compute_on_open(PLAYER, "NA1_0", false).unwrap();
        assert!(!cached.computed);
        let seen = fetches.load(Ordering::SeqCst);
        let forced = engine.compute_on_open(PLAYER, "NA1_0", true).unwrap();
        assert!(forced.computed);
        assert!(fetches.load(Ordering::SeqCst) > seen);

        assert!(engine.store().overall_score(&middle()).is_none());
        // An on-demand row does not block the ranked pipeline.
        assert!(matches!(
            engine.process_match(PLAYER, "NA1_0").unwrap(),
            MatchOutcome::Scored(_)
        ));
    }

    #[test]
    fn degenerate_z_falls_back_to_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(4);
        fx.games.push(game("TOP_1", 10 * 60_000, 420, "TOP"));
        fx.features.insert("TOP_1".into(), metrics(900.0, 1.2));
        let (engine, _) = fx.engine(&dir);
        engine.process_new_matches(PLAYER, Some(420));
        engine.store().clear(ClearScope::Context(&ContextKey::new(PLAYER, Some(420), Some("TOP"))), false).unwrap();

        let out = engine.compute_on_open(PLAYER, "TOP_1", true).unwrap();
        assert!(out.z["laning.gd10"] > 0.0);
        assert!(out.domains[&Domain::Laning] > NEUTRAL);
    }

    #[test]
    fn unknown_match_is_reported_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Fixture::ranked(0).engine(&dir);
        assert!(matches!(
            engine.compute_on_open(PLAYER, "NA1_404", false),
            Err(AppError::MatchNotFound(_))
        ));
    }

    #[test]
    fn racing_opens_share_one_computation() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(1);
        fx.delay = Duration::from_millis(150);
        let (engine, fetches) = fx.engine(&dir);

        thread::scope(|s| {
            let a = s.spawn(|| engine.compute_on_open(PLAYER, "NA1_0", false).unwrap());
            let b = s.spawn(|| engine.compute_on_open(PLAYER, "NA1_0", false).unwrap());
            let (a, b) = (a.join().unwrap(), b.join().unwrap());
            assert_eq!(a.domains, b.domains);
            assert!(a.computed ^ b.computed);
        });
        // Registry lookup hits the store, so only the scoring fetch remains.
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebuild_replays_twice_and_keeps_contexts_apart() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(6);
        fx.games.push(game("TOP_1", 100 * 60_000, 420, "TOP"));
        let (engine, _) = fx.engine(&dir);
        engine.process_new_matches(PLAYER, None);

        let report = engine.rebuild_all(PLAYER, None, true).unwrap();
        assert_eq!(report.contexts, 2);
        assert_eq!(report.matches, 7);
        assert_eq!(report.first_pass.processed, 7);
        assert_eq!(report.second_pass.processed, 7);
        assert!(engine.store().has_pipeline_contribution("TOP_1", PLAYER));
        assert!(engine.store().overall_score(&middle()).is_some());

        let kept = engine.rebuild_all(PLAYER, Some(420), false).unwrap();
        assert_eq!(kept.first_pass.skipped, 7);
        assert_eq!(kept.second_pass.processed, 7);
    }

    #[test]
    fn on_demand_waits_for_pipeline_in_same_context() {
        let dir = tempfile::tempdir().unwrap();
        let (sequential, _) = Fixture::ranked(3).engine(&dir);
        let sequential = sequential.with_mastery(Box::new(SlowMastery));
        sequential.process_match(PLAYER, "NA1_0").unwrap();
        sequential.process_match(PLAYER, "NA1_1").unwrap();
        sequential.compute_on_open(PLAYER, "NA1_2", false).unwrap();

        let (engine, _) = Fixture::ranked(3).engine(&dir);
        let engine = engine.with_mastery(Box::new(SlowMastery));
        engine.process_match(PLAYER, "NA1_0").unwrap();
        thread::scope(|s| {
            let pipeline = s.spawn(|| engine.process_match(PLAYER, "NA1_1").unwrap());
            let opened = s.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                engine.compute_on_open(PLAYER, "NA1_2", false).unwrap()
            });
            pipeline.join().unwrap();
            opened.join().unwrap();
        });

        let state = engine.store().norm_state(&norm_key("gd10")).unwrap();
        let expected = sequential.store().norm_state(&norm_key("gd10")).unwrap();
        assert_eq!(state, expected);
    }

    #[test]
    fn patch_change_widens_clipping_for_three_matches() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(6);
        for g in &mut fx.games[4..] {
            g.info.game_version = "14.2.560.1".to_string();
        }
        let (engine, _) = fx.engine(&dir);

        let ks: Vec<f64> = (0..6)
            .map(|i| huber_k(engine.process_match(PLAYER, &format!("NA1_{}", i)).unwrap()))
            .collect();
        assert_eq!(ks, vec![3.0, 3.0, 3.0, 2.5, 3.0, 3.0]);
        assert_eq!(
            engine.store().patch_ease(&middle()),
            Some(PatchEaseState {
                patch: "14.2".to_string(),
                remaining: 1,
            })
        );
    }

    #[test]
    fn patch_ease_follows_the_extracted_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::ranked(4);
        fx.reported_role = Some("TOP".to_string());
        let (engine, _) = fx.engine(&dir);

        let ks: Vec<f64> = (0..4)
            .map(|i| huber_k(engine.process_match(PLAYER, &format!("NA1_{}", i)).unwrap()))
            .collect();
        assert_eq!(ks, vec![3.0, 3.0, 3.0, 2.5]);
        let top = ContextKey::new(PLAYER, Some(420), Some("TOP"));
        assert_eq!(engine.store().patch_ease(&top).map(|p| p.remaining), Some(0));
        assert!(engine.store().patch_ease(&middle()).is_none());
    }

    #[test]
    fn sustained_laning_deficit_surfaces_in_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Fixture::ranked(8).engine(&dir);
        let mut inst: DomainScores = Domain::ALL.iter().map(|d| (*d, NEUTRAL)).collect();
        inst.insert(Domain::Laning, 40.0);
        let z: FeatureMap = [("gd10".to_string(), -1.2), ("csd10".to_string(), -0.3)]
            .into_iter()
            .collect();
        for i in 0..8 {
            let record = engine.store().match_record(&format!("NA1_{}", i), PLAYER).unwrap();
            let write = MatchWrite {
                contribution: Some(GisEngine::contribution_row(&record, ContribOrigin::Pipeline, &inst, &z)),
                ..MatchWrite::default()
            };
            engine.store().commit(write).unwrap();
        }

        let s = engine.summary(PLAYER, Some(420), None);
        assert_eq!(s.calibration_stage, 2);
        assert!(s.achilles_eligible);
        assert!(s.secondary_eligible);
        assert_eq!(s.primary, Some(Domain::Laning));
        assert!(s.secondary.is_empty());
        assert!(s.advice.unwrap().contains("Gold diff at 10"));
        assert_eq!(s.focus_debug.streak_matches, 8);
        assert!(s.confidence_band < 1e-9);
    }

    #[test]
    fn weight_writes_need_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Fixture::ranked(0).engine(&dir);
        let raw = engine.role_weights();
        assert!(matches!(engine.put_role_weights(&raw), Err(AppError::Forbidden(_))));
        let engine = engine.with_admin(true);
        assert!(engine.put_role_weights(&raw).is_ok());
    }
}
