// Riot API URL builders. `host` is a platform (na1, euw1) or regional
// routing value (americas, europe) depending on the endpoint.

pub fn account_by_riot_id(game_name: &str, tag_line: &str) -> String {
    format!(
        "https://americas.api.riotgames.com/riot/account/v1/accounts/by-riot-id/{}/{}",
        game_name, tag_line
    )
}

pub fn match_ids(routing: &str, puuid: &str, start: usize, count: usize) -> String {
    format!(
        "https://{}.api.riotgames.com/lol/match/v5/matches/by-puuid/{}/ids?start={}&count={}",
        routing, puuid, start, count
    )
}

pub fn match_by_id(routing: &str, match_id: &str) -> String {
    format!("https://{}.api.riotgames.com/lol/match/v5/matches/{}", routing, match_id)
}

pub fn timeline_by_id(routing: &str, match_id: &str) -> String {
    format!(
        "https://{}.api.riotgames.com/lol/match/v5/matches/{}/timeline",
        routing, match_id
    )
}

pub fn champion_masteries(platform: &str, puuid: &str) -> String {
    format!(
        "https://{}.api.riotgames.com/lol/champion-mastery/v4/champion-masteries/by-puuid/{}",
        platform, puuid
    )
}

/// Regional routing value for Match-V5 given a platform id.
pub fn regional_routing(platform: &str) -> &'static str {
    match platform {
        "na1" | "br1" | "la1" | "la2" => "americas",
        "euw1" | "eun1" | "tr1" | "ru" => "europe",
        "kr" | "jp1" => "asia",
        "oc1" | "ph2" | "sg2" | "th2" | "vn2" => "sea",
        _ => "americas",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_groups_platforms() {
        assert_eq!(regional_routing("euw1"), "europe");
        assert_eq!(regional_routing("kr"), "asia");
        assert_eq!(regional_routing("unknown"), "americas");
    }

    #[test]
    fn timeline_url_extends_match_url() {
        let m = match_by_id("europe", "EUW1_1");
        assert!(timeline_by_id("europe", "EUW1_1").starts_with(&m));
    }
}
