use crate::config::Config;
use crate::error::AppError;
use crate::gis::sources::{MasteryLookup, MatchSource};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;
use tracing::warn;

use super::endpoints;
use super::models::*;

const REQUESTS_PER_SECOND: u32 = 20;
const MAX_RETRIES: u32 = 3;

pub struct RiotApiClient {
    api_key: String,
    platform: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
}

impl RiotApiClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let api_key = config.require_api_key()?.to_string();
        let per_second = NonZeroU32::new(REQUESTS_PER_SECOND)
            .ok_or_else(|| AppError::ConfigError("rate limit must be non-zero".to_string()))?;
        Ok(RiotApiClient {
            api_key,
            platform: config.region.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            clock: DefaultClock::default(),
        })
    }

    fn routing(&self) -> &'static str {
        endpoints::regional_routing(&self.platform)
    }

    fn throttle(&self) {
        while let Err(not_until) = self.rate_limiter.check() {
            thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
    }

    fn execute_request(&self, url: &str) -> Result<String, AppError> {
        let mut retry_count = 0;

        loop {
            self.throttle();
            let response = ureq::get(url)
                .set("User-Agent", "loltrack_gis/0.1.0")
                .set("X-Riot-Token", &self.api_key)
                .call();

            match response {
                Ok(resp) => {
                    return resp.into_string().map_err(|e| AppError::HttpError(e.to_string()));
                }
                Err(ureq::Error::Status(404, _)) => {
                    return Err(AppError::NotFound(url.to_string()));
                }
                Err(ureq::Error::Status(429, _)) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(AppError::RateLimited);
                    }
                    let wait_ms = 2000 * (retry_count + 1) as u64;
                    warn!(wait_ms, "rate limited by upstream, backing off");
                    thread::sleep(Duration::from_millis(wait_ms));
                    retry_count += 1;
                }
                Err(e) => {
                    return Err(AppError::HttpError(e.to_string()));
                }
            }
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let body = self.execute_request(url)?;
        serde_json::from_str(&body).map_err(|e| AppError::JsonError(e.to_string()))
    }

    pub fn get_account(&self, game_name: &str, tag_line: &str) -> Result<AccountDto, AppError> {
        let url = endpoints::account_by_riot_id(game_name, tag_line);
        self.get_json(&url).map_err(|e| match e {
            AppError::NotFound(_) | AppError::JsonError(_) => {
                AppError::PlayerNotFound(format!("{}#{}", game_name, tag_line))
            }
            other => other,
        })
    }

    pub fn get_match_ids(&self, puuid: &str, count: usize) -> Result<Vec<String>, AppError> {
        let url = endpoints::match_ids(self.routing(), puuid, 0, count.min(100));
        self.get_json(&url)
    }

    pub fn get_match(&self, match_id: &str) -> Result<MatchDto, AppError> {
        let url = endpoints::match_by_id(self.routing(), match_id);
        self.get_json(&url).map_err(|e| match e {
            AppError::NotFound(_) => AppError::MatchNotFound(match_id.to_string()),
            other => other,
        })
    }

    /// A missing timeline for a known match is an extraction failure, not
    /// an unknown match id.
    pub fn get_timeline(&self, match_id: &str) -> Result<TimelineDto, AppError> {
        let url = endpoints::timeline_by_id(self.routing(), match_id);
        self.get_json(&url).map_err(|e| timeline_error(match_id, e))
    }

    pub fn get_champion_masteries(&self, puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError> {
        let url = endpoints::champion_masteries(&self.platform, puuid);
        self.get_json(&url)
    }
}

fn timeline_error(match_id: &str, e: AppError) -> AppError {
    match e {
        AppError::NotFound(_) => AppError::extraction(match_id, "timeline unavailable"),
        other => other,
    }
}

impl MatchSource for RiotApiClient {
    fn fetch_match(&self, match_id: &str) -> Result<MatchDto, AppError> {
        self.get_match(match_id)
    }

    fn fetch_timeline(&self, match_id: &str) -> Result<TimelineDto, AppError> {
        self.get_timeline(match_id)
    }
}

impl MasteryLookup for RiotApiClient {
    fn champion_masteries(&self, puuid: &str) -> Result<Vec<ChampionMasteryDto>, AppError> {
        self.get_champion_masteries(puuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timeline_is_an_extraction_failure() {
        let err = timeline_error("NA1_1", AppError::NotFound("https://example/timeline".to_string()));
        assert!(matches!(err, AppError::Extraction { ref match_id, .. } if match_id == "NA1_1"));
        assert!(matches!(timeline_error("NA1_1", AppError::RateLimited), AppError::RateLimited));
    }
}
