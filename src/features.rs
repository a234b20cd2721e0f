use crate::api::models::{EventDto, FrameDto, MatchDto, ParticipantDto, PositionDto, TimelineDto};
use crate::error::AppError;
use crate::gis::sources::FeatureExtractor;
use crate::gis::{FeatureMap, MatchMeta};
use std::collections::HashMap;

const MINUTE_MS: i64 = 60_000;
const CONTROL_WARD_ITEM: i32 = 2055;
const OBJECTIVE_RADIUS: f64 = 2500.0;

/// Derives per-match metrics from a Match-V5 payload and its timeline.
pub struct TimelineExtractor;

struct Game<'a> {
    game: &'a MatchDto,
    frames: &'a [FrameDto],
    me: &'a ParticipantDto,
}

fn distance(a: PositionDto, b: PositionDto) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

impl<'a> Game<'a> {
    fn pid(&self) -> i32 {
        self.me.participant_id
    }

    fn minutes(&self) -> f64 {
        (self.game.info.game_duration as f64 / 60.0).max(1.0)
    }

    fn team_of(&self, participant_id: i32) -> Option<i32> {
        self.game
            .info
            .participants
            .iter()
            .find(|p| p.participant_id == participant_id)
            .map(|p| p.team_id)
    }

    fn allied(&self, participant_id: i32) -> bool {
        self.team_of(participant_id) == Some(self.me.team_id)
    }

    /// Frame closest to `ms`.
    fn frame_at(&self, ms: i64) -> &'a FrameDto {
        let frames = self.frames;
        frames
            .iter()
            .min_by_key(|f| (f.timestamp - ms).abs())
            .unwrap_or(&frames[0])
    }

    fn position_at(&self, ms: i64) -> Option<PositionDto> {
        self.frame_at(ms)
            .participant_frames
            .get(&self.pid().to_string())
            .and_then(|pf| pf.position)
    }

    fn events(&self) -> impl Iterator<Item = &'a EventDto> {
        let frames: &'a [FrameDto] = self.frames;
        frames.iter().flat_map(|f| f.events.iter())
    }

    /// Enemy in the same team position, else the enemy who stayed closest
    /// between 2:00 and 10:00.
    fn lane_opponent(&self) -> Option<i32> {
        let position = self.me.team_position.as_str();
        if !position.is_empty() && position != "UTILITY" {
            let same_lane = self
                .game
                .info
                .participants
                .iter()
                .find(|p| p.team_id != self.me.team_id && p.team_position == position);
            if let Some(p) = same_lane {
                return Some(p.participant_id);
            }
        }

        let mut distances: HashMap<i32, Vec<f64>> = HashMap::new();
        for frame in self
            .frames
            .iter()
            .filter(|f| (2 * MINUTE_MS..=10 * MINUTE_MS).contains(&f.timestamp))
        {
            let Some(mine) = frame
                .participant_frames
                .get(&self.pid().to_string())
                .and_then(|pf| pf.position)
            else {
                continue;
            };
            for (id, pf) in &frame.participant_frames {
                let Ok(id) = id.parse::<i32>() else { continue };
                if id == self.pid() || self.allied(id) {
                    continue;
                }
                if let Some(theirs) = pf.position {
                    distances.entry(id).or_default().push(distance(mine, theirs));
                }
            }
        }
        distances
            .into_iter()
            .map(|(id, d)| (id, median(d)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }

    fn lane_diffs(&self, out: &mut FeatureMap) {
        let Some(opp) = self.lane_opponent() else {
            return;
        };
        let me = self.pid().to_string();
        let opp = opp.to_string();
        for (minute, gold, xp, cs) in [(10, "gd10", "xpd10", "csd10"), (15, "gd15", "xpd15", ""), (14, "", "", "csd14")] {
            let frame = self.frame_at(minute * MINUTE_MS);
            let (Some(a), Some(b)) = (frame.participant_frames.get(&me), frame.participant_frames.get(&opp)) else {
                continue;
            };
            if !gold.is_empty() {
                out.insert(gold.to_string(), (a.total_gold - b.total_gold) as f64);
                out.insert(xp.to_string(), (a.xp - b.xp) as f64);
            }
            if !cs.is_empty() {
                let cs_a = a.minions_killed + a.jungle_minions_killed;
                let cs_b = b.minions_killed + b.jungle_minions_killed;
                out.insert(cs.to_string(), (cs_a - cs_b) as f64);
            }
        }
    }

    fn early_window(&self, out: &mut FeatureMap) {
        let pid = self.pid();
        let mut deaths_pre10 = 0;
        let mut plates = 0;
        let mut control_wards = 0;
        let mut team_kills = 0;
        let mut involved = 0;

        for ev in self.events() {
            let pre14 = ev.timestamp < 14 * MINUTE_MS;
            match ev.kind.as_str() {
                "CHAMPION_KILL" => {
                    if ev.victim_id == pid && ev.timestamp < 10 * MINUTE_MS {
                        deaths_pre10 += 1;
                    }
                    if pre14 && ev.killer_id > 0 && self.allied(ev.killer_id) {
                        team_kills += 1;
                        if ev.killer_id == pid || ev.assisting_participant_ids.contains(&pid) {
                            involved += 1;
                        }
                    }
                }
                "TURRET_PLATE_DESTROYED" if pre14 && ev.killer_id == pid => plates += 1,
                "ITEM_PURCHASED" if pre14 && ev.participant_id == pid && ev.item_id == CONTROL_WARD_ITEM => {
                    control_wards += 1
                }
                _ => {}
            }
        }

        let frame14 = self.frame_at(14 * MINUTE_MS);
        if let Some(pf) = frame14.participant_frames.get(&pid.to_string()) {
            out.insert(
                "csmin14".to_string(),
                (pf.minions_killed + pf.jungle_minions_killed) as f64 / 14.0,
            );
        }
        let kp_early = if team_kills > 0 {
            involved as f64 / team_kills as f64 * 100.0
        } else {
            0.0
        };
        out.insert("early_deaths_pre10".to_string(), deaths_pre10 as f64);
        out.insert("plates_pre14".to_string(), plates as f64);
        out.insert("ctrl_wards_pre14".to_string(), control_wards as f64);
        out.insert("kp_early".to_string(), kp_early);
    }

    fn per_minute(&self, out: &mut FeatureMap) {
        let minutes = self.minutes();
        let me = self.me;
        out.insert("dpm".to_string(), me.total_damage_dealt_to_champions as f64 / minutes);
        out.insert("gpm".to_string(), me.gold_earned as f64 / minutes);
        out.insert("vision_per_min".to_string(), me.vision_score / minutes);
        out.insert("wards_killed".to_string(), me.wards_killed as f64);
        out.insert("time_dead_per_min".to_string(), me.total_time_spent_dead as f64 / minutes);

        let team_damage: i64 = self
            .game
            .info
            .participants
            .iter()
            .filter(|p| p.team_id == me.team_id)
            .map(|p| p.total_damage_dealt_to_champions)
            .sum();
        let share = if team_damage > 0 {
            (me.total_damage_dealt_to_champions as f64 / team_damage as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        out.insert("damage_share".to_string(), share);
    }

    fn objectives(&self, out: &mut FeatureMap) {
        let pid = self.pid();
        let mut team_objectives = 0;
        let mut mine = 0;
        let mut near = 0;

        for ev in self.events() {
            let counted = match ev.kind.as_str() {
                "ELITE_MONSTER_KILL" => matches!(ev.monster_type.as_str(), "DRAGON" | "RIFTHERALD" | "BARON_NASHOR"),
                "BUILDING_KILL" => ev.building_type == "TOWER_BUILDING",
                _ => continue,
            };
            if !self.allied(ev.killer_id) {
                continue;
            }
            if counted {
                team_objectives += 1;
                if ev.killer_id == pid || ev.assisting_participant_ids.contains(&pid) {
                    mine += 1;
                }
            }
            if let (Some(at), Some(mine_pos)) = (ev.position, self.position_at(ev.timestamp)) {
                if distance(at, mine_pos) <= OBJECTIVE_RADIUS {
                    near += 1;
                }
            }
        }

        let participation = if team_objectives > 0 {
            mine as f64 / team_objectives as f64 * 100.0
        } else {
            0.0
        };
        out.insert("obj_participation".to_string(), participation);
        out.insert("obj_near".to_string(), near as f64);
    }

    /// Path length walked before 14:00, from frame positions.
    fn roaming(&self, out: &mut FeatureMap) {
        let pid = self.pid().to_string();
        let points: Vec<PositionDto> = self
            .frames
            .iter()
            .take_while(|f| f.timestamp <= 14 * MINUTE_MS)
            .filter_map(|f| f.participant_frames.get(&pid).and_then(|pf| pf.position))
            .collect();
        let walked: f64 = points.windows(2).map(|w| distance(w[0], w[1])).sum();
        out.insert("roam_distance_pre14".to_string(), walked);
    }
}

impl FeatureExtractor for TimelineExtractor {
    fn extract(&self, game: &MatchDto, timeline: &TimelineDto, puuid: &str) -> Result<(FeatureMap, MatchMeta), AppError> {
        let match_id = game.metadata.match_id.as_str();
        let me = game
            .info
            .participants
            .iter()
            .find(|p| p.puuid == puuid)
            .ok_or_else(|| AppError::extraction(match_id, "player did not take part in this match"))?;
        if timeline.info.frames.is_empty() {
            return Err(AppError::extraction(match_id, "timeline has no frames"));
        }

        let g = Game {
            game,
            frames: &timeline.info.frames,
            me,
        };
        let mut features = FeatureMap::new();
        g.lane_diffs(&mut features);
        g.early_window(&mut features);
        g.per_minute(&mut features);
        g.objectives(&mut features);
        g.roaming(&mut features);

        let meta = MatchMeta {
            queue_id: game.info.queue_id,
            role: Some(me.team_position.clone()).filter(|r| !r.is_empty()),
        };
        Ok((features, meta))
    }
}
