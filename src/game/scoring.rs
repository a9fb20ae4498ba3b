use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::game::band::BandState;
use crate::game::chart::{BpmChange, DEFAULT_BPM};
use crate::game::note::MAX_LANES;

pub const NOTE_POINTS: u32 = 30;
pub const SUSTAIN_POINTS_PER_BEAT: f64 = 12.0;
pub const COMBO_PER_TIER: u32 = 10;
/// Fill gained for each completed overdrive phrase.
pub const PHRASE_FILL: f64 = 0.25;
/// A full meter drains over this many beats (1920 / bpm seconds).
pub const OVERDRIVE_DRAIN_BEATS: f64 = 32.0;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Instrument {
    Drums,
    Bass,
    #[default]
    Guitar,
    Vocals,
    Keys,
    ClassicDrums,
    ClassicBass,
    ClassicGuitar,
}

impl Instrument {
    /// Bass and vocals climb two extra multiplier tiers.
    #[inline(always)]
    pub const fn is_bass_like(self) -> bool {
        matches!(self, Self::Bass | Self::Vocals | Self::ClassicBass)
    }

    #[inline(always)]
    pub const fn max_base_multiplier(self) -> u32 {
        if self.is_bass_like() { 6 } else { 4 }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drums => "Drums",
            Self::Bass => "Bass",
            Self::Guitar => "Guitar",
            Self::Vocals => "Vocals",
            Self::Keys => "Keys",
            Self::ClassicDrums => "ClassicDrums",
            Self::ClassicBass => "ClassicBass",
            Self::ClassicGuitar => "ClassicGuitar",
        }
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drums" => Ok(Self::Drums),
            "bass" => Ok(Self::Bass),
            "guitar" => Ok(Self::Guitar),
            "vocals" => Ok(Self::Vocals),
            "keys" => Ok(Self::Keys),
            "classicdrums" => Ok(Self::ClassicDrums),
            "classicbass" => Ok(Self::ClassicBass),
            "classicguitar" => Ok(Self::ClassicGuitar),
            other => Err(format!("'{other}' is not a valid instrument")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SoloResult {
    pub start: f64,
    pub end: f64,
    pub notes_hit: u32,
    pub note_count: u32,
}

impl SoloResult {
    pub fn percent(&self) -> f64 {
        if self.note_count == 0 {
            return 0.0;
        }
        f64::from(self.notes_hit) / f64::from(self.note_count) * 100.0
    }
}

/// Per-player progression state for one play session.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStats {
    pub instrument: Instrument,

    pub combo: u32,
    pub max_combo: u32,
    pub score: u64,
    pub notes_hit: u32,
    pub notes_missed: u32,
    pub perfect_hit: u32,
    pub strikes: u32,
    pub fc: bool,

    pub overdrive_fill: f64,
    pub overdrive: bool,
    pub overdrive_active_fill: f64,
    pub overdrive_active_time: f64,
    /// Time of the press that last activated overdrive.
    pub overdrive_hit_time: f64,
    overdrive_tick_time: f64,

    pub sustain_score_buffer: [f64; MAX_LANES],
    pub extended_sustain_active: bool,

    pub held_frets: [bool; MAX_LANES],
    pub held_frets_alt: [bool; MAX_LANES],

    pub cur_note_idx: [usize; MAX_LANES],
    pub cur_od_phrase: usize,
    pub cur_solo: usize,
    pub cur_beat_line: usize,
    pub cur_bpm: usize,

    pub solo_results: Vec<SoloResult>,
}

impl PlayerStats {
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            combo: 0,
            max_combo: 0,
            score: 0,
            notes_hit: 0,
            notes_missed: 0,
            perfect_hit: 0,
            strikes: 0,
            fc: true,
            overdrive_fill: 0.0,
            overdrive: false,
            overdrive_active_fill: 0.0,
            overdrive_active_time: 0.0,
            overdrive_hit_time: f64::NEG_INFINITY,
            overdrive_tick_time: 0.0,
            sustain_score_buffer: [0.0; MAX_LANES],
            extended_sustain_active: false,
            held_frets: [false; MAX_LANES],
            held_frets_alt: [false; MAX_LANES],
            cur_note_idx: [0; MAX_LANES],
            cur_od_phrase: 0,
            cur_solo: 0,
            cur_beat_line: 0,
            cur_bpm: 0,
            solo_results: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.instrument);
    }

    #[inline(always)]
    pub fn lane_down(&self, lane: usize) -> bool {
        self.held_frets.get(lane).copied().unwrap_or(false)
            || self.held_frets_alt.get(lane).copied().unwrap_or(false)
    }

    /// The combo-driven multiplier, ignoring overdrive.
    #[inline(always)]
    pub fn no_od_multiplier(&self) -> u32 {
        (1 + self.combo / COMBO_PER_TIER).min(self.instrument.max_base_multiplier())
    }

    #[inline(always)]
    pub fn multiplier(&self) -> u32 {
        if self.overdrive {
            self.no_od_multiplier() * 2
        } else {
            self.no_od_multiplier()
        }
    }

    #[inline(always)]
    pub fn max_mult_for_meter(&self) -> u32 {
        self.instrument.max_base_multiplier() - 1
    }

    /// Position inside the current multiplier tier, 0..1. Pinned at 1 once
    /// the top tier is reached.
    pub fn combo_fill(&self) -> f64 {
        if self.combo >= self.max_mult_for_meter() * COMBO_PER_TIER {
            return 1.0;
        }
        f64::from(self.combo % COMBO_PER_TIER) / f64::from(COMBO_PER_TIER)
    }

    pub fn multiplier_fill(&self) -> f64 {
        f64::from(self.no_od_multiplier() - 1) / f64::from(self.max_mult_for_meter())
    }

    pub fn buffered_sustain_score(&self) -> f64 {
        self.sustain_score_buffer.iter().sum()
    }

    /// Committed score plus whatever sustains are currently accruing.
    pub fn display_score(&self) -> u64 {
        self.score + self.buffered_sustain_score().floor() as u64
    }

    pub fn hit_note(&mut self, perfect: bool, band: &mut BandState) {
        let mult = self.multiplier();
        band.add_note_point(self.no_od_multiplier());
        self.score += u64::from(NOTE_POINTS * mult);
        self.notes_hit += 1;
        self.combo += 1;
        self.max_combo = self.max_combo.max(self.combo);
        if perfect {
            self.perfect_hit += 1;
        }
    }

    pub fn miss_note(&mut self) {
        self.notes_missed += 1;
        self.combo = 0;
        self.fc = false;
    }

    /// A stray press. The combo survives unless the press also forfeits a
    /// phrase, which the caller books as a miss.
    pub fn overhit(&mut self) {
        self.strikes += 1;
        self.fc = false;
    }

    /// Recomputes a lane's pending sustain credit from the time held so far.
    pub fn buffer_sustain(&mut self, lane: usize, held_time: f64, len: f64, beats_len: f64) {
        if lane >= MAX_LANES || len <= 0.0 {
            return;
        }
        let ratio = (held_time / len).clamp(0.0, 1.0);
        self.sustain_score_buffer[lane] =
            ratio * SUSTAIN_POINTS_PER_BEAT * beats_len * f64::from(self.multiplier());
    }

    /// Moves a lane's buffered sustain credit into the score. Returns the
    /// points committed.
    pub fn commit_sustain(&mut self, lane: usize, band: &mut BandState) -> u64 {
        let Some(buffer) = self.sustain_score_buffer.get_mut(lane) else {
            return 0;
        };
        let points = buffer.floor().max(0.0) as u64;
        *buffer = 0.0;
        self.score += points;
        band.add_sustain_points(points);
        points
    }

    /// Starts overdrive at `time` if there is any fill and it is not already
    /// running.
    pub fn activate_overdrive(&mut self, time: f64, band: &mut BandState) -> bool {
        if self.overdrive || self.overdrive_fill <= 0.0 {
            return false;
        }
        self.overdrive = true;
        self.overdrive_active_fill = self.overdrive_fill;
        self.overdrive_active_time = time;
        self.overdrive_tick_time = time;
        self.overdrive_hit_time = time;
        band.player_entered_overdrive();
        info!(
            "Overdrive activated at {time:.3}s with {:.0}% fill",
            self.overdrive_fill * 100.0
        );
        true
    }

    /// Drains the active meter up to `now`, integrating across tempo changes.
    /// Calls with a time at or before the last tick do nothing.
    pub fn tick_overdrive(&mut self, now: f64, bpms: &[BpmChange], band: &mut BandState) {
        if !self.overdrive || now <= self.overdrive_tick_time {
            return;
        }
        loop {
            let bpm_idx = bpm_index_at(bpms, self.overdrive_active_time);
            let bpm = bpms.get(bpm_idx).map_or(DEFAULT_BPM, |b| b.bpm);
            let span = OVERDRIVE_DRAIN_BEATS * 60.0 / bpm;
            let next_change = bpms
                .get(bpm_idx + 1)
                .map(|b| b.time)
                .filter(|&time| time < now);
            let seg_end = next_change.unwrap_or(now);
            let fill = self.overdrive_active_fill - (seg_end - self.overdrive_active_time) / span;
            if fill <= 0.0 {
                let expiry = self.overdrive_active_time + self.overdrive_active_fill * span;
                self.deactivate_overdrive(expiry, band);
                return;
            }
            self.overdrive_fill = fill;
            match next_change {
                Some(time) => {
                    self.overdrive_active_fill = fill;
                    self.overdrive_active_time = time;
                }
                None => break,
            }
        }
        self.overdrive_tick_time = now;
    }

    fn deactivate_overdrive(&mut self, at: f64, band: &mut BandState) {
        self.overdrive = false;
        self.overdrive_fill = 0.0;
        self.overdrive_active_fill = 0.0;
        self.overdrive_active_time = at;
        self.overdrive_tick_time = at;
        band.player_left_overdrive();
        info!("Overdrive ended at {at:.3}s");
    }

    /// Credits a completed phrase at `at`. Returns whether any fill was gained.
    pub fn add_phrase_fill(&mut self, at: f64, bpms: &[BpmChange], band: &mut BandState) -> bool {
        self.tick_overdrive(at, bpms, band);
        if self.overdrive_fill >= 1.0 {
            debug!("Phrase completed with a full meter");
            return false;
        }
        self.overdrive_fill = (self.overdrive_fill + PHRASE_FILL).min(1.0);
        if self.overdrive {
            self.overdrive_active_fill = self.overdrive_fill;
            self.overdrive_active_time = self.overdrive_tick_time.max(at);
            self.overdrive_tick_time = self.overdrive_active_time;
        }
        true
    }
}

/// Index of the tempo in force at `time`.
#[inline(always)]
pub fn bpm_index_at(bpms: &[BpmChange], time: f64) -> usize {
    bpms.partition_point(|b| b.time <= time).saturating_sub(1)
}
