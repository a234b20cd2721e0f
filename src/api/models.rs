use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Account V1 response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    pub puuid: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub tag_line: String,
}

// Champion Mastery V4 response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChampionMasteryDto {
    pub champion_id: i64,
    #[serde(default)]
    pub champion_level: i32,
    #[serde(default)]
    pub champion_points: i64,
}

// Match V5 response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchDto {
    pub metadata: MatchMetadata,
    pub info: MatchInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMetadata {
    pub match_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    #[serde(default)]
    pub game_duration: i64,
    #[serde(default)]
    pub game_creation: i64,
    #[serde(default)]
    pub game_version: String,
    #[serde(default)]
    pub queue_id: i32,
    #[serde(default)]
    pub participants: Vec<ParticipantDto>,
}

impl MatchInfo {
    /// "14.3.556.1234" -> "14.3"
    pub fn patch(&self) -> String {
        self.game_version.split('.').take(2).collect::<Vec<_>>().join(".")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantDto {
    pub puuid: String,
    pub participant_id: i32,
    pub champion_id: i64,
    pub team_id: i32,
    pub team_position: String, // TOP, JUNGLE, MIDDLE, BOTTOM, UTILITY
    pub gold_earned: i64,
    pub total_damage_dealt_to_champions: i64,
    pub vision_score: f64,
    pub wards_killed: i32,
    pub total_time_spent_dead: i64,
}

// Match V5 timeline response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineDto {
    #[serde(default)]
    pub info: TimelineInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineInfo {
    #[serde(default)]
    pub frames: Vec<FrameDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameDto {
    pub timestamp: i64,
    pub participant_frames: HashMap<String, ParticipantFrameDto>,
    pub events: Vec<EventDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantFrameDto {
    pub total_gold: i64,
    pub xp: i64,
    pub minions_killed: i64,
    pub jungle_minions_killed: i64,
    pub position: Option<PositionDto>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PositionDto {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDto {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    pub killer_id: i32,
    pub victim_id: i32,
    pub monster_type: String,
    pub building_type: String,
    pub participant_id: i32,
    pub item_id: i32,
    pub assisting_participant_ids: Vec<i32>,
    pub position: Option<PositionDto>,
}
