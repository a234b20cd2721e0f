//! Role-specific domain weights for the overall score.
//!
//! Weights live in an admin-editable JSON file. Reads go through
//! [`WeightsStore::effective`], which re-parses the file only when its
//! modification time changes and falls back to the built-in presets when the
//! file is absent or invalid.

use super::Domain;
use crate::error::{AppError, WeightsError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{info, warn};

pub const SCHEMA_VERSION: &str = "weights.v1";
pub const REQUIRED_ROLES: [&str; 5] = ["TOP", "JUNGLE", "MIDDLE", "BOTTOM", "UTILITY"];
const SUM_TOLERANCE: f64 = 1e-6;

pub type DomainWeights = BTreeMap<Domain, f64>;
/// Payload shape: role -> domain name -> weight, as accepted over the wire.
pub type RawRoleWeights = BTreeMap<String, BTreeMap<String, f64>>;

/// Maps API-facing role aliases onto the internal team positions.
pub fn canonical_role(role: &str) -> String {
    let upper = role.trim().to_ascii_uppercase();
    match upper.as_str() {
        "MID" => "MIDDLE".to_string(),
        "ADC" => "BOTTOM".to_string(),
        "SUPPORT" => "UTILITY".to_string(),
        _ => upper,
    }
}

fn api_role(role: &str) -> String {
    match role {
        "MIDDLE" => "MID".to_string(),
        "BOTTOM" => "ADC".to_string(),
        "UTILITY" => "SUPPORT".to_string(),
        other => other.to_string(),
    }
}

fn preset(role: &str) -> Option<DomainWeights> {
    use Domain::*;
    let table: [(Domain, f64); 7] = match role {
        "TOP" => [(Laning, 0.30), (Economy, 0.20), (Damage, 0.15), (Macro, 0.15), (Objectives, 0.10), (Vision, 0.05), (Discipline, 0.05)],
        "JUNGLE" => [(Objectives, 0.30), (Macro, 0.20), (Laning, 0.10), (Economy, 0.10), (Damage, 0.10), (Vision, 0.10), (Discipline, 0.10)],
        "MIDDLE" => [(Laning, 0.28), (Damage, 0.20), (Economy, 0.18), (Macro, 0.14), (Objectives, 0.10), (Vision, 0.05), (Discipline, 0.05)],
        "BOTTOM" => [(Economy, 0.25), (Damage, 0.22), (Laning, 0.22), (Objectives, 0.12), (Macro, 0.09), (Vision, 0.05), (Discipline, 0.05)],
        "UTILITY" => [(Vision, 0.28), (Objectives, 0.20), (Macro, 0.14), (Laning, 0.14), (Damage, 0.12), (Economy, 0.06), (Discipline, 0.06)],
        _ => return None,
    };
    Some(table.into_iter().collect())
}

/// Equal weight across every domain.
pub fn balanced() -> DomainWeights {
    let w = 1.0 / Domain::ALL.len() as f64;
    Domain::ALL.iter().map(|d| (*d, w)).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleWeights {
    roles: BTreeMap<String, DomainWeights>,
}

impl RoleWeights {
    pub fn defaults() -> Self {
        let roles = REQUIRED_ROLES
            .iter()
            .filter_map(|r| preset(r).map(|w| (r.to_string(), w)))
            .collect();
        RoleWeights { roles }
    }

    /// Configured role, else the built-in preset, else balanced.
    pub fn for_role(&self, role: Option<&str>) -> DomainWeights {
        let Some(role) = role.map(canonical_role) else {
            return balanced();
        };
        self.roles
            .get(&role)
            .cloned()
            .or_else(|| preset(&role))
            .unwrap_or_else(balanced)
    }

    pub fn validate(raw: &RawRoleWeights) -> Result<Self, WeightsError> {
        if raw.is_empty() {
            return Err(WeightsError::Empty);
        }

        let mut normalized: BTreeMap<String, &BTreeMap<String, f64>> = BTreeMap::new();
        for (role, domains) in raw {
            normalized.insert(canonical_role(role), domains);
        }

        for required in REQUIRED_ROLES {
            if !normalized.contains_key(required) {
                return Err(WeightsError::MissingRole(required.to_string()));
            }
        }

        let mut roles = BTreeMap::new();
        for (role, domains) in normalized {
            let unknown: Vec<String> = domains
                .keys()
                .filter(|k| Domain::parse(k).is_none())
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(WeightsError::UnknownDomain { role, keys: unknown });
            }

            let mut parsed = DomainWeights::new();
            for (key, value) in domains {
                if let Some(domain) = Domain::parse(key) {
                    *parsed.entry(domain).or_insert(0.0) += *value;
                }
            }

            let total: f64 = parsed.values().sum();
            if !total.is_finite() || (total - 1.0).abs() > SUM_TOLERANCE {
                return Err(WeightsError::BadSum { role, total });
            }
            roles.insert(role, parsed);
        }

        Ok(RoleWeights { roles })
    }

    /// API-facing view: role aliases and Title Case domain names.
    pub fn to_api(&self) -> RawRoleWeights {
        self.roles
            .iter()
            .map(|(role, domains)| {
                let dmap = domains.iter().map(|(d, w)| (d.label(), *w)).collect();
                (api_role(role), dmap)
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WeightsDocument {
    pub schema_version: String,
    pub roles: RawRoleWeights,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredWeights {
    Wrapped { roles: RawRoleWeights },
    Bare(RawRoleWeights),
}

struct Cached {
    modified: SystemTime,
    weights: RoleWeights,
}

pub struct WeightsStore {
    path: PathBuf,
    cache: Mutex<Option<Cached>>,
}

impl WeightsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WeightsStore {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn effective(&self) -> RoleWeights {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return RoleWeights::defaults(),
        };

        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.as_ref() {
            if cached.modified == modified {
                return cached.weights.clone();
            }
        }

        let weights = match Self::read_file(&self.path) {
            Ok(w) => w,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring invalid weights file");
                RoleWeights::defaults()
            }
        };
        *cache = Some(Cached {
            modified,
            weights: weights.clone(),
        });
        weights
    }

    fn read_file(path: &Path) -> Result<RoleWeights, AppError> {
        let content = fs::read_to_string(path)?;
        let stored: StoredWeights = serde_json::from_str(&content)
            .map_err(|e| AppError::JsonError(format!("Failed to parse weights: {}", e)))?;
        let raw = match stored {
            StoredWeights::Wrapped { roles } => roles,
            StoredWeights::Bare(roles) => roles,
        };
        Ok(RoleWeights::validate(&raw)?)
    }

    /// Validates the whole payload before touching the file; a rejected
    /// payload leaves the previous weights in force.
    pub fn put(&self, raw: &RawRoleWeights, admin: bool) -> Result<RoleWeights, AppError> {
        if !admin {
            return Err(AppError::Forbidden("set LOLTRACK_ADMIN=1 to edit weights".to_string()));
        }
        let validated = RoleWeights::validate(raw)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = WeightsDocument {
            schema_version: SCHEMA_VERSION.to_string(),
            roles: raw.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| AppError::JsonError(format!("Failed to serialize weights: {}", e)))?;
        fs::write(&self.path, json)?;

        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
        info!(path = %self.path.display(), "role weights updated");
        Ok(validated)
    }
}
