use chrono::{DateTime, Local};
use serde::Serialize;

use crate::game::band::BandState;
use crate::game::scoring::{Instrument, PlayerStats, SoloResult};

/// Score/base ratios for 1..=5 stars followed by the gold-star ratio.
pub const DEFAULT_STAR_THRESHOLDS: [f64; 6] = [0.05, 0.175, 0.325, 0.5, 0.7, 1.0];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StarRating {
    pub stars: u8,
    pub gold: bool,
}

impl StarRating {
    pub fn compute(score: u64, base_score: u64, thresholds: &[f64; 6]) -> Self {
        if base_score == 0 {
            return Self::default();
        }
        let ratio = score as f64 / base_score as f64;
        let stars = thresholds[..5].iter().take_while(|&&t| ratio >= t).count() as u8;
        Self {
            stars,
            gold: stars == 5 && ratio >= thresholds[5],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerStageSummary {
    pub instrument: Instrument,
    pub score: u64,
    pub base_score: u64,
    pub stars: StarRating,
    pub max_combo: u32,
    pub notes_hit: u32,
    pub notes_missed: u32,
    pub perfect_hit: u32,
    pub strikes: u32,
    pub full_combo: bool,
    pub solos: Vec<SoloResult>,
}

impl PlayerStageSummary {
    pub fn from_stats(stats: &PlayerStats, base_score: u64, thresholds: &[f64; 6]) -> Self {
        let score = stats.display_score();
        Self {
            instrument: stats.instrument,
            score,
            base_score,
            stars: StarRating::compute(score, base_score, thresholds),
            max_combo: stats.max_combo,
            notes_hit: stats.notes_hit,
            notes_missed: stats.notes_missed,
            perfect_hit: stats.perfect_hit,
            strikes: stats.strikes,
            full_combo: stats.fc,
            solos: stats.solo_results.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StageSummary {
    pub finished_at: DateTime<Local>,
    pub music_time: f64,
    pub band_score: u64,
    pub players: Vec<PlayerStageSummary>,
}

impl StageSummary {
    pub fn new(music_time: f64, band: &BandState, players: Vec<PlayerStageSummary>) -> Self {
        Self {
            finished_at: Local::now(),
            music_time,
            band_score: band.score,
            players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stars_climb_thresholds_in_order() {
        let t = DEFAULT_STAR_THRESHOLDS;
        assert_eq!(StarRating::compute(0, 1000, &t).stars, 0);
        assert_eq!(StarRating::compute(50, 1000, &t).stars, 1);
        assert_eq!(StarRating::compute(400, 1000, &t).stars, 3);
        let five = StarRating::compute(800, 1000, &t);
        assert_eq!((five.stars, five.gold), (5, false));
        assert!(StarRating::compute(1000, 1000, &t).gold);
    }

    #[test]
    fn zero_base_score_yields_no_stars() {
        assert_eq!(
            StarRating::compute(500, 0, &DEFAULT_STAR_THRESHOLDS),
            StarRating::default()
        );
    }

    #[test]
    fn summary_serializes_with_timestamp() {
        let stats = PlayerStats::new(Instrument::Bass);
        let player = PlayerStageSummary::from_stats(&stats, 100, &DEFAULT_STAR_THRESHOLDS);
        let summary = StageSummary::new(12.5, &BandState::new(1), vec![player]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["players"][0]["instrument"], "Bass");
        assert_eq!(json["players"][0]["full_combo"], true);
        assert!(json["finished_at"].is_string());
    }
}
