//! Persistent engine state: match registry, baselines, per-match
//! contributions and smoothed scores, kept in memory and written as one JSON
//! document.

use crate::api::models::MatchDto;
use crate::error::AppError;
use crate::gis::normalize::{NormKey, NormState};
use crate::gis::scoring::DomainScores;
use crate::gis::{ContextKey, Domain, FeatureMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub puuid: String,
    pub queue_id: i32,
    pub role: Option<String>,
    pub champion_id: i64,
    pub duration_s: i64,
    pub patch: String,
    pub game_creation_ms: i64,
}

impl MatchRecord {
    /// Registry row for `puuid`'s side of a match; `None` if they did not play in it.
    pub fn from_dto(dto: &MatchDto, puuid: &str) -> Option<Self> {
        let me = dto.info.participants.iter().find(|p| p.puuid == puuid)?;
        Some(MatchRecord {
            match_id: dto.metadata.match_id.clone(),
            puuid: puuid.to_string(),
            queue_id: dto.info.queue_id,
            role: Some(me.team_position.clone()).filter(|r| !r.is_empty()),
            champion_id: me.champion_id,
            duration_s: dto.info.game_duration,
            patch: dto.info.patch(),
            game_creation_ms: dto.info.game_creation,
        })
    }

    pub fn context(&self) -> ContextKey {
        ContextKey::new(&self.puuid, Some(self.queue_id), self.role.as_deref())
    }

    fn key(&self) -> (String, String) {
        (self.match_id.clone(), self.puuid.clone())
    }

    fn in_context(&self, queue: Option<i32>, role: Option<&str>, ranked: &[i32]) -> bool {
        ranked.contains(&self.queue_id)
            && queue.map_or(true, |q| self.queue_id == q)
            && role.map_or(true, |r| self.role.as_deref() == Some(r))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContribOrigin {
    /// Written by the ranked smoothing pipeline.
    Pipeline,
    /// Written by a compute-on-open request; never smoothed.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainContribution {
    pub inst_score: f64,
    pub z_metrics: FeatureMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchContribution {
    pub match_id: String,
    pub puuid: String,
    pub origin: ContribOrigin,
    pub computed_at: DateTime<Utc>,
    pub domains: BTreeMap<Domain, DomainContribution>,
}

impl MatchContribution {
    pub fn inst_scores(&self) -> DomainScores {
        self.domains.iter().map(|(d, c)| (*d, c.inst_score)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEaseState {
    pub patch: String,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub match_id: String,
    pub puuid: String,
    pub queue_id: i32,
    pub role: Option<String>,
    pub game_creation_ms: i64,
    pub metrics: FeatureMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedScore {
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

/// Everything one processed match writes, applied atomically.
#[derive(Debug, Default)]
pub struct MatchWrite {
    pub norm: Vec<(NormKey, NormState)>,
    pub patch_ease: Option<(ContextKey, PatchEaseState)>,
    pub domain_scores: Option<(ContextKey, DomainScores)>,
    pub overall: Option<(ContextKey, f64)>,
    pub contribution: Option<MatchContribution>,
    pub features: Option<FeatureRow>,
}

pub enum ClearScope<'a> {
    /// Every context of a player, optionally restricted to one queue.
    Player { player: &'a str, queue: Option<i32> },
    /// Exactly one (player, queue, role) context.
    Context(&'a ContextKey),
}

impl ClearScope<'_> {
    fn covers(&self, player: &str, queue: Option<i32>, role: Option<&str>) -> bool {
        match self {
            ClearScope::Player { player: p, queue: q } => *p == player && (q.is_none() || *q == queue),
            ClearScope::Context(ctx) => {
                ctx.player == player && ctx.queue == queue && ctx.role.as_deref() == role
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    matches: HashMap<(String, String), MatchRecord>,
    norm: HashMap<NormKey, NormState>,
    contribs: HashMap<(String, String), MatchContribution>,
    domain_scores: HashMap<(ContextKey, Domain), SmoothedScore>,
    overall: HashMap<ContextKey, SmoothedScore>,
    patch_ease: HashMap<ContextKey, PatchEaseState>,
    features: HashMap<(String, String), FeatureRow>,
    low_mastery: HashMap<String, Vec<i64>>,
}

impl Tables {
    fn apply(&mut self, write: MatchWrite) {
        let now = Utc::now();
        for (key, state) in write.norm {
            self.norm.insert(key, state);
        }
        if let Some((ctx, state)) = write.patch_ease {
            self.patch_ease.insert(ctx, state);
        }
        if let Some((ctx, scores)) = write.domain_scores {
            for (domain, value) in scores {
                self.domain_scores
                    .insert((ctx.clone(), domain), SmoothedScore { value, updated_at: now });
            }
        }
        if let Some((ctx, value)) = write.overall {
            self.overall.insert(ctx, SmoothedScore { value, updated_at: now });
        }
        if let Some(c) = write.contribution {
            self.contribs.insert((c.match_id.clone(), c.puuid.clone()), c);
        }
        if let Some(f) = write.features {
            self.features.insert((f.match_id.clone(), f.puuid.clone()), f);
        }
    }

    fn record_in_context(&self, match_id: &str, puuid: &str, queue: Option<i32>, role: Option<&str>, ranked: &[i32]) -> Option<&MatchRecord> {
        self.matches
            .get(&(match_id.to_string(), puuid.to_string()))
            .filter(|m| m.in_context(queue, role, ranked))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    matches: Vec<MatchRecord>,
    norm: Vec<(NormKey, NormState)>,
    contributions: Vec<MatchContribution>,
    domain_scores: Vec<(ContextKey, Domain, SmoothedScore)>,
    overall: Vec<(ContextKey, SmoothedScore)>,
    patch_ease: Vec<(ContextKey, PatchEaseState)>,
    features: Vec<FeatureRow>,
    low_mastery: Vec<(String, Vec<i64>)>,
}

impl From<&Tables> for Snapshot {
    fn from(t: &Tables) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            matches: t.matches.values().cloned().collect(),
            norm: t.norm.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            contributions: t.contribs.values().cloned().collect(),
            domain_scores: t
                .domain_scores
                .iter()
                .map(|((ctx, d), s)| (ctx.clone(), *d, *s))
                .collect(),
            overall: t.overall.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            patch_ease: t.patch_ease.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            features: t.features.values().cloned().collect(),
            low_mastery: t.low_mastery.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

impl From<Snapshot> for Tables {
    fn from(s: Snapshot) -> Self {
        Tables {
            matches: s.matches.into_iter().map(|m| (m.key(), m)).collect(),
            norm: s.norm.into_iter().collect(),
            contribs: s
                .contributions
                .into_iter()
                .map(|c| ((c.match_id.clone(), c.puuid.clone()), c))
                .collect(),
            domain_scores: s
                .domain_scores
                .into_iter()
                .map(|(ctx, d, v)| ((ctx, d), v))
                .collect(),
            overall: s.overall.into_iter().collect(),
            patch_ease: s.patch_ease.into_iter().collect(),
            features: s
                .features
                .into_iter()
                .map(|f| ((f.match_id.clone(), f.puuid.clone()), f))
                .collect(),
            low_mastery: s.low_mastery.into_iter().collect(),
        }
    }
}

pub struct Store {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
    /// Open [`DeferredWrites`] scopes; both counters change only under the tables lock.
    deferred: AtomicUsize,
    dirty: AtomicBool,
}

/// Commits made while this is alive apply in memory only; the snapshot is
/// written once when the outermost scope finishes.
pub struct DeferredWrites<'a> {
    store: &'a Store,
    open: bool,
}

impl DeferredWrites<'_> {
    pub fn finish(mut self) -> Result<(), AppError> {
        self.open = false;
        self.store.end_deferred()
    }
}

impl Drop for DeferredWrites<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.store.end_deferred() {
                warn!(error = %e, "failed to persist deferred writes");
            }
        }
    }
}

impl Store {
    pub fn in_memory() -> Self {
        Store {
            path: None,
            tables: Mutex::new(Tables::default()),
            deferred: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let tables = match fs::read_to_string(&path) {
            Ok(content) => {
                let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
                    AppError::JsonError(format!("Failed to parse store {}: {}", path.display(), e))
                })?;
                Tables::from(snapshot)
            }
            Err(_) => Tables::default(),
        };
        Ok(Store {
            path: Some(path),
            tables: Mutex::new(tables),
            deferred: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        })
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, tables: &Tables) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Snapshot::from(tables))
            .map_err(|e| AppError::Store(format!("Failed to serialize store: {}", e)))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Applies `mutate` to a copy, persists it, and only then makes it
    /// visible. A failed write leaves the previous state in place. Inside a
    /// deferred scope, or without a backing file, `mutate` applies in place.
    fn transact<R>(&self, mutate: impl FnOnce(&mut Tables) -> R) -> Result<R, AppError> {
        let mut tables = self.tables();
        if self.path.is_none() || self.deferred.load(Ordering::SeqCst) > 0 {
            let out = mutate(&mut tables);
            self.dirty.store(true, Ordering::SeqCst);
            return Ok(out);
        }
        let mut next = tables.clone();
        let out = mutate(&mut next);
        self.persist(&next)?;
        *tables = next;
        Ok(out)
    }

    /// Starts a batch of commits that is persisted as one snapshot.
    pub fn deferred(&self) -> DeferredWrites<'_> {
        let _tables = self.tables();
        self.deferred.fetch_add(1, Ordering::SeqCst);
        DeferredWrites { store: self, open: true }
    }

    fn end_deferred(&self) -> Result<(), AppError> {
        let tables = self.tables();
        let outermost = self.deferred.fetch_sub(1, Ordering::SeqCst) == 1;
        if outermost && self.dirty.swap(false, Ordering::SeqCst) {
            self.persist(&tables)?;
        }
        Ok(())
    }

    pub fn upsert_match(&self, record: MatchRecord) -> Result<(), AppError> {
        self.transact(|t| {
            t.matches.insert(record.key(), record);
        })
    }

    pub fn match_record(&self, match_id: &str, puuid: &str) -> Option<MatchRecord> {
        self.tables()
            .matches
            .get(&(match_id.to_string(), puuid.to_string()))
            .cloned()
    }

    pub fn commit(&self, write: MatchWrite) -> Result<(), AppError> {
        self.transact(|t| t.apply(write))
    }

    pub fn norm_state(&self, key: &NormKey) -> Option<NormState> {
        self.tables().norm.get(key).copied()
    }

    pub fn contribution(&self, match_id: &str, puuid: &str) -> Option<MatchContribution> {
        self.tables()
            .contribs
            .get(&(match_id.to_string(), puuid.to_string()))
            .cloned()
    }

    pub fn has_pipeline_contribution(&self, match_id: &str, puuid: &str) -> bool {
        self.contribution(match_id, puuid)
            .map(|c| c.origin == ContribOrigin::Pipeline)
            .unwrap_or(false)
    }

    pub fn domain_scores(&self, ctx: &ContextKey) -> DomainScores {
        let tables = self.tables();
        Domain::ALL
            .iter()
            .filter_map(|d| {
                tables
                    .domain_scores
                    .get(&(ctx.clone(), *d))
                    .map(|s| (*d, s.value))
            })
            .collect()
    }

    pub fn overall_score(&self, ctx: &ContextKey) -> Option<f64> {
        self.tables().overall.get(ctx).map(|s| s.value)
    }

    pub fn patch_ease(&self, ctx: &ContextKey) -> Option<PatchEaseState> {
        self.tables().patch_ease.get(ctx).cloned()
    }

    pub fn low_mastery(&self, puuid: &str) -> Option<Vec<i64>> {
        self.tables().low_mastery.get(puuid).cloned()
    }

    pub fn set_low_mastery(&self, puuid: &str, champions: Vec<i64>) -> Result<(), AppError> {
        self.transact(|t| {
            t.low_mastery.insert(puuid.to_string(), champions);
        })
    }

    /// Registered matches for a player, oldest first.
    pub fn matches_chronological(&self, puuid: &str, queue: Option<i32>) -> Vec<MatchRecord> {
        let mut rows: Vec<MatchRecord> = self
            .tables()
            .matches
            .values()
            .filter(|m| m.puuid == puuid && queue.map_or(true, |q| m.queue_id == q))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.game_creation_ms
                .cmp(&b.game_creation_ms)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        rows
    }

    pub fn count_ranked(&self, puuid: &str, queue: Option<i32>, role: Option<&str>, ranked: &[i32]) -> usize {
        self.tables()
            .matches
            .values()
            .filter(|m| m.puuid == puuid && m.in_context(queue, role, ranked))
            .count()
    }

    /// Most frequent role across the newest `last` ranked matches.
    pub fn dominant_role(&self, puuid: &str, queue: Option<i32>, ranked: &[i32], last: usize) -> Option<String> {
        let mut recent: Vec<MatchRecord> = self
            .matches_chronological(puuid, queue)
            .into_iter()
            .filter(|m| ranked.contains(&m.queue_id))
            .collect();
        recent.reverse();

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for role in recent.iter().take(last).filter_map(|m| m.role.clone()) {
            *counts.entry(role).or_insert(0) += 1;
        }
        counts.into_iter().max_by_key(|(_, n)| *n).map(|(r, _)| r)
    }

    /// Contributions in a context, newest first.
    pub fn recent_contributions(
        &self,
        puuid: &str,
        queue: Option<i32>,
        role: Option<&str>,
        ranked: &[i32],
        limit: usize,
    ) -> Vec<(MatchRecord, MatchContribution)> {
        let tables = self.tables();
        let mut rows: Vec<(MatchRecord, MatchContribution)> = tables
            .contribs
            .values()
            .filter(|c| c.puuid == puuid)
            .filter_map(|c| {
                tables
                    .record_in_context(&c.match_id, puuid, queue, role, ranked)
                    .map(|m| (m.clone(), c.clone()))
            })
            .collect();
        rows.sort_by(|a, b| {
            b.0.game_creation_ms
                .cmp(&a.0.game_creation_ms)
                .then_with(|| b.0.match_id.cmp(&a.0.match_id))
        });
        rows.truncate(limit);
        rows
    }

    /// Raw metric rows from other matches, newest first. `None` filters
    /// match any queue or role.
    pub fn feature_history(
        &self,
        puuid: &str,
        queue: Option<i32>,
        role: Option<&str>,
        exclude_match: &str,
        limit: usize,
    ) -> Vec<FeatureMap> {
        let tables = self.tables();
        let mut rows: Vec<&FeatureRow> = tables
            .features
            .values()
            .filter(|f| {
                f.puuid == puuid
                    && f.match_id != exclude_match
                    && queue.map_or(true, |q| f.queue_id == q)
                    && role.map_or(true, |r| f.role.as_deref() == Some(r))
            })
            .collect();
        rows.sort_by(|a, b| b.game_creation_ms.cmp(&a.game_creation_ms));
        rows.into_iter().take(limit).map(|f| f.metrics.clone()).collect()
    }

    /// Drops derived state in `scope`. With `keep_baselines` the NormState
    /// survives so a replay starts from warmed baselines.
    pub fn clear(&self, scope: ClearScope<'_>, keep_baselines: bool) -> Result<usize, AppError> {
        self.transact(|t| {
            let in_scope: HashSet<(String, String)> = t
                .matches
                .values()
                .filter(|m| scope.covers(&m.puuid, Some(m.queue_id), m.role.as_deref()))
                .map(MatchRecord::key)
                .collect();

            let before = t.contribs.len();
            t.contribs.retain(|key, _| !in_scope.contains(key));
            let removed = before - t.contribs.len();

            t.domain_scores
                .retain(|(ctx, _), _| !scope.covers(&ctx.player, ctx.queue, ctx.role.as_deref()));
            t.overall
                .retain(|ctx, _| !scope.covers(&ctx.player, ctx.queue, ctx.role.as_deref()));
            t.patch_ease
                .retain(|ctx, _| !scope.covers(&ctx.player, ctx.queue, ctx.role.as_deref()));
            if !keep_baselines {
                t.norm
                    .retain(|k, _| !scope.covers(&k.player, k.queue, k.role.as_deref()));
                t.features
                    .retain(|_, f| !scope.covers(&f.puuid, Some(f.queue_id), f.role.as_deref()));
            }
            removed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, queue: i32, role: &str, ms: i64) -> MatchRecord {
        MatchRecord {
            match_id: id.to_string(),
            puuid: "p1".to_string(),
            queue_id: queue,
            role: Some(role.to_string()),
            champion_id: 1,
            duration_s: 1800,
            patch: "14.1".to_string(),
            game_creation_ms: ms,
        }
    }

    fn contribution(id: &str, origin: ContribOrigin) -> MatchContribution {
        MatchContribution {
            match_id: id.to_string(),
            puuid: "p1".to_string(),
            origin,
            computed_at: Utc::now(),
            domains: Domain::ALL
                .iter()
                .map(|d| (*d, DomainContribution { inst_score: 50.0, z_metrics: FeatureMap::new() }))
                .collect(),
        }
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let ctx = ContextKey::new("p1", Some(420), Some("MIDDLE"));
        {
            let store = Store::open(&path).unwrap();
            store.upsert_match(record("M1", 420, "MIDDLE", 1)).unwrap();
            let mut write = MatchWrite::default();
            write.overall = Some((ctx.clone(), 53.5));
            write.domain_scores = Some((ctx.clone(), [(Domain::Vision, 48.0)].into_iter().collect()));
            write.contribution = Some(contribution("M1", ContribOrigin::Pipeline));
            store.commit(write).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.overall_score(&ctx), Some(53.5));
        assert_eq!(store.domain_scores(&ctx)[&Domain::Vision], 48.0);
        assert!(store.has_pipeline_contribution("M1", "p1"));
        assert_eq!(store.match_record("M1", "p1").unwrap().queue_id, 420);
    }

    #[test]
    fn shared_match_keeps_both_players_rows() {
        let store = Store::in_memory();
        let mut theirs = record("M1", 420, "TOP", 1);
        theirs.puuid = "p2".to_string();
        store.upsert_match(record("M1", 420, "MIDDLE", 1)).unwrap();
        store.upsert_match(theirs).unwrap();

        assert_eq!(store.match_record("M1", "p1").unwrap().role.as_deref(), Some("MIDDLE"));
        assert_eq!(store.match_record("M1", "p2").unwrap().role.as_deref(), Some("TOP"));
        assert_eq!(store.count_ranked("p1", Some(420), None, &[420]), 1);
        assert_eq!(store.count_ranked("p2", Some(420), Some("TOP"), &[420]), 1);
    }

    #[test]
    fn deferred_commits_write_one_snapshot_at_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let ctx = ContextKey::new("p1", Some(420), Some("MIDDLE"));
        let store = Store::open(&path).unwrap();

        let batch = store.deferred();
        store.upsert_match(record("M1", 420, "MIDDLE", 1)).unwrap();
        let mut write = MatchWrite::default();
        write.overall = Some((ctx.clone(), 51.0));
        store.commit(write).unwrap();
        assert!(!path.exists());
        assert_eq!(store.overall_score(&ctx), Some(51.0));
        batch.finish().unwrap();

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.overall_score(&ctx), Some(51.0));
        assert!(reopened.match_record("M1", "p1").is_some());
    }

    #[test]
    fn on_demand_rows_do_not_count_as_pipeline() {
        let store = Store::in_memory();
        let mut write = MatchWrite::default();
        write.contribution = Some(contribution("M1", ContribOrigin::OnDemand));
        store.commit(write).unwrap();
        assert!(store.contribution("M1", "p1").is_some());
        assert!(!store.has_pipeline_contribution("M1", "p1"));
    }

    #[test]
    fn context_queries_filter_and_order() {
        let store = Store::in_memory();
        store.upsert_match(record("A", 420, "JUNGLE", 3)).unwrap();
        store.upsert_match(record("B", 420, "JUNGLE", 1)).unwrap();
        store.upsert_match(record("C", 420, "TOP", 2)).unwrap();
        store.upsert_match(record("D", 450, "JUNGLE", 4)).unwrap();
        for id in ["A", "B", "C", "D"] {
            let mut w = MatchWrite::default();
            w.contribution = Some(contribution(id, ContribOrigin::Pipeline));
            store.commit(w).unwrap();
        }

        let ranked = [420, 440];
        assert_eq!(store.count_ranked("p1", Some(420), Some("JUNGLE"), &ranked), 2);
        assert_eq!(store.count_ranked("p1", None, None, &ranked), 3);
        let recent: Vec<String> = store
            .recent_contributions("p1", Some(420), Some("JUNGLE"), &ranked, 10)
            .into_iter()
            .map(|(m, _)| m.match_id)
            .collect();
        assert_eq!(recent, vec!["A", "B"]);
        let order: Vec<String> = store.matches_chronological("p1", None).into_iter().map(|m| m.match_id).collect();
        assert_eq!(order, vec!["B", "C", "A", "D"]);
        assert_eq!(store.dominant_role("p1", None, &ranked, 10).as_deref(), Some("JUNGLE"));
    }

    #[test]
    fn clear_context_keeps_other_contexts_and_optionally_baselines() {
        let store = Store::in_memory();
        store.upsert_match(record("A", 420, "JUNGLE", 1)).unwrap();
        store.upsert_match(record("B", 420, "TOP", 2)).unwrap();
        let jungle = ContextKey::new("p1", Some(420), Some("JUNGLE"));
        let top = ContextKey::new("p1", Some(420), Some("TOP"));
        let norm_key = NormKey { player: "p1".into(), queue: Some(420), role: Some("JUNGLE".into()), metric: "gd10".into() };
        for (id, ctx) in [("A", &jungle), ("B", &top)] {
            let mut w = MatchWrite::default();
            w.overall = Some((ctx.clone(), 55.0));
            w.contribution = Some(contribution(id, ContribOrigin::Pipeline));
            w.norm = vec![(norm_key.clone(), NormState { mean: 1.0, variance: 1.0 })];
            store.commit(w).unwrap();
        }

        let removed = store.clear(ClearScope::Context(&jungle), true).unwrap();
        assert_eq!(removed, 1);
        assert!(store.overall_score(&jungle).is_none());
        assert_eq!(store.overall_score(&top), Some(55.0));
        assert!(store.norm_state(&norm_key).is_some());

        store.clear(ClearScope::Player { player: "p1", queue: None }, false).unwrap();
        assert!(store.norm_state(&norm_key).is_none());
        assert!(store.contribution("B", "p1").is_none());
    }
}
