use crate::api::models::{MatchDto, TimelineDto};
use crate::error::AppError;
use crate::gis::sources::MatchSource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk cache of raw Match-V5 and timeline payloads, one file each per
/// match id. Misses fall through to `upstream` when one is configured.
pub struct RawMatchCache {
    dir: PathBuf,
    upstream: Option<Box<dyn MatchSource>>,
}

impl RawMatchCache {
    pub fn new(dir: impl Into<PathBuf>, upstream: Option<Box<dyn MatchSource>>) -> Self {
        let dir = dir.into();
        let _ = fs::create_dir_all(&dir);
        RawMatchCache { dir, upstream }
    }

    fn file_stem(match_id: &str) -> String {
        match_id.replace(['/', '\\', '#'], "_")
    }

    fn match_path(&self, match_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::file_stem(match_id)))
    }

    fn timeline_path(&self, match_id: &str) -> PathBuf {
        self.dir.join(format!("{}.timeline.json", Self::file_stem(match_id)))
    }

    fn load<T: DeserializeOwned>(path: &Path) -> Option<T> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
                None
            }
        }
    }

    fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
        let json = serde_json::to_string(value)
            .map_err(|e| AppError::JsonError(format!("Failed to serialize cache entry: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }

    fn through<T, F>(&self, path: PathBuf, match_id: &str, fetch: F) -> Result<T, AppError>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&dyn MatchSource) -> Result<T, AppError>,
    {
        if let Some(hit) = Self::load(&path) {
            debug!(match_id, "raw cache hit");
            return Ok(hit);
        }
        let upstream = self
            .upstream
            .as_deref()
            .ok_or_else(|| AppError::MatchNotFound(match_id.to_string()))?;
        let value = fetch(upstream)?;
        if let Err(e) = Self::save(&path, &value) {
            warn!(match_id, error = %e, "failed to write raw cache");
        }
        Ok(value)
    }
}

impl MatchSource for RawMatchCache {
    fn fetch_match(&self, match_id: &str) -> Result<MatchDto, AppError> {
        self.through(self.match_path(match_id), match_id, |up| up.fetch_match(match_id))
    }

    fn fetch_timeline(&self, match_id: &str) -> Result<TimelineDto, AppError> {
        self.through(self.timeline_path(match_id), match_id, |up| up.fetch_timeline(match_id))
    }
}
