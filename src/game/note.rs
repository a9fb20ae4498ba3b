use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const MAX_LANES: usize = 5;

bitflags! {
    /// One bit per lane. Lower lanes occupy lower bits, which is what makes
    /// the anchoring rule in [`FretMask::single_match`] a plain range test.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
    pub struct FretMask: u8 {
        const LANE_0 = 1 << 0;
        const LANE_1 = 1 << 1;
        const LANE_2 = 1 << 2;
        const LANE_3 = 1 << 3;
        const LANE_4 = 1 << 4;
    }
}

impl FretMask {
    /// Exact chord shape; superset when extended sustain is active.
    #[inline(always)]
    pub fn chord_match(self, pressed: FretMask, extended: bool) -> bool {
        if extended {
            pressed.contains(self)
        } else {
            pressed == self
        }
    }

    /// Target fret plus any lower frets, nothing above it.
    #[inline(always)]
    pub fn single_match(self, pressed: FretMask, extended: bool) -> bool {
        if extended {
            return pressed.contains(self);
        }
        let p = u16::from(pressed.bits());
        let m = u16::from(self.bits());
        p >= m && p < m * 2
    }
}

/// Lane to bit mapping for a given instrument/difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLayout {
    pub lane_count: usize,
    masks: [FretMask; MAX_LANES],
}

impl LaneLayout {
    pub const FOUR_LANE: Self = Self {
        lane_count: 4,
        masks: [
            FretMask::LANE_0,
            FretMask::LANE_1,
            FretMask::LANE_2,
            FretMask::LANE_3,
            FretMask::empty(),
        ],
    };

    pub const FIVE_LANE: Self = Self {
        lane_count: 5,
        masks: [
            FretMask::LANE_0,
            FretMask::LANE_1,
            FretMask::LANE_2,
            FretMask::LANE_3,
            FretMask::LANE_4,
        ],
    };

    pub fn for_lane_count(lane_count: usize) -> Option<Self> {
        match lane_count {
            4 => Some(Self::FOUR_LANE),
            5 => Some(Self::FIVE_LANE),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn mask(&self, lane: usize) -> FretMask {
        self.masks.get(lane).copied().unwrap_or_else(FretMask::empty)
    }

    pub fn mask_of(&self, held: &[bool; MAX_LANES]) -> FretMask {
        held.iter()
            .take(self.lane_count)
            .enumerate()
            .filter(|(_, down)| **down)
            .fold(FretMask::empty(), |acc, (lane, _)| acc | self.mask(lane))
    }
}

/// A note as the chart producer hands it over.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NoteData {
    pub lane: u8,
    pub time: f64,
    pub len: f64,
    pub lift: bool,
    pub phopo: bool,
    #[serde(rename = "ptap")]
    pub p_tap: bool,
    pub extended_sustain: bool,
    /// Sustain length in beats. Derived from the tempo map when absent.
    pub beats_len: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Note {
    pub lane: usize,
    pub time: f64,
    pub len: f64,
    pub lift: bool,
    pub chord: bool,
    pub mask: FretMask,
    pub phopo: bool,
    pub p_tap: bool,
    pub extended_sustain: bool,
    pub beats_len: f64,

    // Judgment state. Only the judgment engine and the frame advancer write these.
    pub hit: bool,
    pub miss: bool,
    pub accounted: bool,
    pub held: bool,
    pub held_time: f64,
    pub hit_time: f64,
    pub perfect: bool,
    pub counted_for_od_phrase: bool,
    pub counted_for_solo: bool,
    pub render_as_od: bool,
}

impl Note {
    #[inline(always)]
    pub fn is_sustain(&self) -> bool {
        self.len > 0.0
    }

    #[inline(always)]
    pub fn end_time(&self) -> f64 {
        self.time + self.len
    }

    pub fn reset_judgment(&mut self) {
        self.hit = false;
        self.miss = false;
        self.accounted = false;
        self.held = false;
        self.held_time = 0.0;
        self.hit_time = 0.0;
        self.perfect = false;
        self.counted_for_od_phrase = false;
        self.counted_for_solo = false;
        self.render_as_od = false;
    }

    pub fn view(&self) -> NoteView {
        NoteView {
            lane: self.lane,
            time: self.time,
            len: self.len,
            lift: self.lift,
            phopo: self.phopo,
            p_tap: self.p_tap,
            hit: self.hit,
            miss: self.miss,
            held: self.held,
            perfect: self.perfect,
            render_as_od: self.render_as_od,
        }
    }
}

/// Draw state handed to renderers. Carries no way back into the chart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NoteView {
    pub lane: usize,
    pub time: f64,
    pub len: f64,
    pub lift: bool,
    pub phopo: bool,
    pub p_tap: bool,
    pub hit: bool,
    pub miss: bool,
    pub held: bool,
    pub perfect: bool,
    pub render_as_od: bool,
}
