use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const QUEUE_RANKED_SOLO: i32 = 420;
pub const QUEUE_RANKED_FLEX: i32 = 440;
/// ARAM, Arena-style and custom queues never feed the smoothing pipeline.
pub const EXCLUDED_QUEUES: [i32; 3] = [450, 460, 490];

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub region: String,
    pub data_dir: PathBuf,
    pub weights_path: PathBuf,
    pub admin: bool,
    pub gis: GisConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_key = env::var("RIOT_API_KEY").ok().filter(|k| !k.trim().is_empty());
        let region = env::var("RIOT_REGION").unwrap_or_else(|_| "na1".to_string());

        let data_dir = env::var("LOLTRACK_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".loltrack")
            });
        fs::create_dir_all(&data_dir)?;

        let weights_path = env::var("LOLTRACK_WEIGHTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("weights.json"));

        let admin = env::var("LOLTRACK_ADMIN").map(|v| v == "1").unwrap_or(false);
        let gis = GisConfig::load(&data_dir.join("gis.json"))?;

        Ok(Config {
            api_key,
            region,
            data_dir,
            weights_path,
            admin,
            gis,
        })
    }

    pub fn require_api_key(&self) -> Result<&str, AppError> {
        self.api_key.as_deref().ok_or_else(|| {
            AppError::ConfigError("RIOT_API_KEY not found in environment or .env file".to_string())
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("gis_state.json")
    }

    pub fn match_cache_dir(&self) -> PathBuf {
        self.data_dir.join("matches")
    }
}

/// The player resolved by the last `sync`; later commands default to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub puuid: String,
    pub game_name: String,
    pub tag_line: String,
}

impl PlayerProfile {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("player.json")
    }

    pub fn load(data_dir: &Path) -> Result<Self, AppError> {
        let path = Self::path(data_dir);
        let content = fs::read_to_string(&path).map_err(|_| {
            AppError::ConfigError("no tracked player yet; run `sync <name> <tag>` first".to_string())
        })?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::JsonError(format!("Failed to serialize profile: {}", e)))?;
        fs::write(Self::path(data_dir), json)?;
        Ok(())
    }

    pub fn riot_id(&self) -> String {
        format!("{}#{}", self.game_name, self.tag_line)
    }
}

/// Tunables for calibration, focus gating and standardization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GisConfig {
    #[serde(rename = "minMatchesForGIS")]
    pub min_matches_for_gis: usize,
    pub min_matches_for_focus: usize,
    pub min_primary_gap: f64,
    pub min_primary_lead: f64,
    pub hysteresis_matches: usize,
    pub max_band_for_focus: f64,
    pub secondary_gap: f64,
    pub ranked_queues: Vec<i32>,
    pub max_negative_impact_low_mastery: f64,
    /// Sigma floor for metrics without a tuned epsilon.
    pub eps_sigma: f64,
    pub huber_k: f64,
    pub patch_huber_k: f64,
    pub patch_ease_matches: u32,
    pub achilles_window: usize,
    pub band_window: usize,
    pub lock_wait_secs: u64,
}

impl Default for GisConfig {
    fn default() -> Self {
        GisConfig {
            min_matches_for_gis: 5,
            min_matches_for_focus: 8,
            min_primary_gap: -4.0,
            min_primary_lead: 2.0,
            hysteresis_matches: 3,
            max_band_for_focus: 6.0,
            secondary_gap: -2.0,
            ranked_queues: vec![QUEUE_RANKED_SOLO, QUEUE_RANKED_FLEX],
            max_negative_impact_low_mastery: 3.0,
            eps_sigma: 0.5,
            huber_k: 2.5,
            patch_huber_k: 3.0,
            patch_ease_matches: 3,
            achilles_window: 8,
            band_window: 10,
            lock_wait_secs: 5,
        }
    }
}

impl GisConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AppError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(_) => Ok(GisConfig::default()),
        }
    }

    pub fn is_ranked(&self, queue_id: i32) -> bool {
        self.ranked_queues.contains(&queue_id) && !EXCLUDED_QUEUES.contains(&queue_id)
    }
}
