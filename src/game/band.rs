use log::debug;
use serde::Serialize;

use crate::game::scoring::NOTE_POINTS;

/// Aggregate state shared by every player in a session. The session owns the
/// only instance and lends it out one player at a time.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BandState {
    pub multiplayer: bool,
    pub players_in_overdrive: u32,
    pub overdrive: bool,
    pub score: u64,
}

impl BandState {
    pub fn new(player_count: usize) -> Self {
        Self {
            multiplayer: player_count > 1,
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(if self.multiplayer { 2 } else { 1 });
    }

    pub fn player_entered_overdrive(&mut self) {
        if !self.multiplayer {
            return;
        }
        self.players_in_overdrive += 1;
        self.overdrive = true;
        debug!("Band overdrive: {} player(s) active", self.players_in_overdrive);
    }

    pub fn player_left_overdrive(&mut self) {
        if !self.multiplayer {
            return;
        }
        self.players_in_overdrive = self.players_in_overdrive.saturating_sub(1);
        self.overdrive = self.players_in_overdrive > 0;
    }

    /// Credits one hit note to the band using the player's no-overdrive multiplier.
    pub fn add_note_point(&mut self, no_od_multiplier: u32) {
        if !self.multiplayer {
            return;
        }
        self.score += u64::from(NOTE_POINTS) * u64::from(no_od_multiplier);
    }

    pub fn add_sustain_points(&mut self, points: u64) {
        if self.multiplayer {
            self.score += points;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_player_band_is_inert() {
        let mut band = BandState::new(1);
        band.player_entered_overdrive();
        band.add_note_point(4);
        assert_eq!(band, BandState::new(1));
    }

    #[test]
    fn overdrive_counter_tracks_players() {
        let mut band = BandState::new(2);
        band.player_entered_overdrive();
        band.player_entered_overdrive();
        band.player_left_overdrive();
        assert_eq!(band.players_in_overdrive, 1);
        assert!(band.overdrive);
        band.player_left_overdrive();
        band.player_left_overdrive();
        assert_eq!(band.players_in_overdrive, 0);
        assert!(!band.overdrive);
    }

    #[test]
    fn note_points_use_multiplier() {
        let mut band = BandState::new(3);
        band.add_note_point(2);
        band.add_sustain_points(7);
        assert_eq!(band.score, u64::from(NOTE_POINTS) * 2 + 7);
        band.reset();
        assert!(band.multiplayer);
        assert_eq!(band.score, 0);
    }
}
