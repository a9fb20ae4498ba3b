use std::ops::Range;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::note::{FretMask, LaneLayout, Note, NoteData, NoteView};

/// Notes closer together than this are treated as one chord row.
pub const CHORD_TIME_EPSILON: f64 = 1e-4;
pub const DEFAULT_BPM: f64 = 120.0;

#[derive(Debug, Error, PartialEq)]
pub enum ChartError {
    #[error("unsupported lane count {0} (expected 4 or 5)")]
    UnsupportedLaneCount(usize),

    #[error("note {index}: lane {lane} out of range for a {lane_count}-lane chart")]
    LaneOutOfRange {
        index: usize,
        lane: u8,
        lane_count: usize,
    },

    #[error("note {index}: time or length is not a finite non-negative value")]
    InvalidNoteTiming { index: usize },

    #[error("duplicate note on lane {lane} at {time:.4}s")]
    DuplicateNote { lane: usize, time: f64 },

    #[error("{kind} {index}: end {end:.4}s is not after start {start:.4}s")]
    EmptyRange {
        kind: &'static str,
        index: usize,
        start: f64,
        end: f64,
    },

    #[error("{kind} {index} starts at {start:.4}s before the previous one ends at {prev_end:.4}s")]
    OverlappingRange {
        kind: &'static str,
        index: usize,
        start: f64,
        prev_end: f64,
    },

    #[error("tempo change {index}: bpm {bpm} must be finite and positive")]
    InvalidBpm { index: usize, bpm: f64 },

    #[error("tempo change {index} at {time:.4}s is out of order")]
    UnorderedBpm { index: usize, time: f64 },

    #[error("beat line {index} at {time:.4}s is out of order")]
    UnorderedBeatLine { index: usize, time: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct BpmChange {
    pub time: f64,
    pub bpm: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct BeatLine {
    pub time: f64,
    #[serde(default)]
    pub major: bool,
}

/// Finalized chart data as delivered by the chart producer.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChartData {
    pub lane_count: usize,
    pub notes: Vec<NoteData>,
    pub od_phrases: Vec<TimeRange>,
    pub solos: Vec<TimeRange>,
    pub beat_lines: Vec<BeatLine>,
    pub bpms: Vec<BpmChange>,
    pub music_start: f64,
    pub base_score: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OdPhrase {
    pub start: f64,
    pub end: f64,
    pub note_count: u32,
    pub notes_hit: u32,
    pub missed: bool,
    pub added: bool,
    /// Indices into `Chart::notes` of the notes inside `[start, end)`.
    pub notes: Range<usize>,
}

impl OdPhrase {
    #[inline(always)]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    #[inline(always)]
    pub fn is_resolved(&self) -> bool {
        self.added || self.missed
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Solo {
    pub start: f64,
    pub end: f64,
    pub note_count: u32,
    pub notes_hit: u32,
    pub notes: Range<usize>,
}

impl Solo {
    #[inline(always)]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

#[derive(Clone, Debug)]
pub struct Chart {
    pub layout: LaneLayout,
    pub notes: Vec<Note>,
    pub notes_per_lane: Vec<Vec<usize>>,
    pub od_phrases: Vec<OdPhrase>,
    pub solos: Vec<Solo>,
    pub beat_lines: Vec<BeatLine>,
    pub bpms: Vec<BpmChange>,
    pub music_start: f64,
    pub base_score: Option<u32>,
}

impl Chart {
    /// Validates producer data and builds the judgment-ready chart: notes
    /// sorted by time (ties by lane), per-lane indices, chord masks, phrase and
    /// solo note ranges, and sustain beat lengths.
    pub fn from_data(data: ChartData) -> Result<Self, ChartError> {
        let layout = LaneLayout::for_lane_count(data.lane_count)
            .ok_or(ChartError::UnsupportedLaneCount(data.lane_count))?;

        let bpms = validate_bpms(data.bpms)?;
        for (index, pair) in data.beat_lines.windows(2).enumerate() {
            if !pair[1].time.is_finite() || pair[1].time < pair[0].time {
                return Err(ChartError::UnorderedBeatLine {
                    index: index + 1,
                    time: pair[1].time,
                });
            }
        }

        let mut notes = Vec::with_capacity(data.notes.len());
        for (index, raw) in data.notes.into_iter().enumerate() {
            if usize::from(raw.lane) >= layout.lane_count {
                return Err(ChartError::LaneOutOfRange {
                    index,
                    lane: raw.lane,
                    lane_count: layout.lane_count,
                });
            }
            if !raw.time.is_finite() || !raw.len.is_finite() || raw.time < 0.0 || raw.len < 0.0 {
                return Err(ChartError::InvalidNoteTiming { index });
            }
            let beats_len = match raw.beats_len {
                Some(b) if b.is_finite() && b >= 0.0 => b,
                _ => beat_at(&bpms, raw.time + raw.len) - beat_at(&bpms, raw.time),
            };
            notes.push(Note {
                lane: usize::from(raw.lane),
                time: raw.time,
                len: raw.len,
                lift: raw.lift,
                phopo: raw.phopo,
                p_tap: raw.p_tap,
                extended_sustain: raw.extended_sustain,
                beats_len,
                ..Note::default()
            });
        }
        notes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.lane.cmp(&b.lane)));

        assign_chords(&mut notes, &layout)?;

        let mut notes_per_lane = vec![Vec::new(); layout.lane_count];
        for (idx, note) in notes.iter().enumerate() {
            notes_per_lane[note.lane].push(idx);
        }

        let od_phrases = validate_ranges("overdrive phrase", &data.od_phrases)?
            .into_iter()
            .map(|(start, end)| {
                let notes = note_range(&notes, start, end);
                OdPhrase {
                    start,
                    end,
                    note_count: notes.len() as u32,
                    notes_hit: 0,
                    missed: false,
                    added: false,
                    notes,
                }
            })
            .collect();
        let solos = validate_ranges("solo", &data.solos)?
            .into_iter()
            .map(|(start, end)| {
                let notes = note_range(&notes, start, end);
                Solo {
                    start,
                    end,
                    note_count: notes.len() as u32,
                    notes_hit: 0,
                    notes,
                }
            })
            .collect();

        let mut chart = Self {
            layout,
            notes,
            notes_per_lane,
            od_phrases,
            solos,
            beat_lines: data.beat_lines,
            bpms,
            music_start: data.music_start,
            base_score: data.base_score,
        };
        chart.reset_judgments();
        debug!(
            "Chart built: {} notes, {} lanes, {} phrases, {} solos, {} tempo changes",
            chart.notes.len(),
            chart.layout.lane_count,
            chart.od_phrases.len(),
            chart.solos.len(),
            chart.bpms.len()
        );
        Ok(chart)
    }

    /// Re-zeroes every judgment flag and phrase/solo counter. Used when a
    /// play session restarts; the immutable chart data is left untouched.
    pub fn reset_judgments(&mut self) {
        for note in &mut self.notes {
            note.reset_judgment();
        }
        for phrase in &mut self.od_phrases {
            phrase.notes_hit = 0;
            phrase.missed = false;
            phrase.added = false;
            for note in &mut self.notes[phrase.notes.clone()] {
                note.render_as_od = true;
            }
        }
        for solo in &mut self.solos {
            solo.notes_hit = 0;
        }
    }

    #[inline(always)]
    pub fn lane_count(&self) -> usize {
        self.layout.lane_count
    }

    /// Index of the note on `lane` at `time`, if any.
    pub fn find_note_idx(&self, time: f64, lane: usize) -> Option<usize> {
        let lane_notes = self.notes_per_lane.get(lane)?;
        let start = lane_notes
            .partition_point(|&idx| self.notes[idx].time < time - CHORD_TIME_EPSILON);
        lane_notes[start..]
            .iter()
            .copied()
            .take_while(|&idx| self.notes[idx].time <= time + CHORD_TIME_EPSILON)
            .next()
    }

    /// Index of the phrase containing `time`, searching forward from `from`.
    pub fn od_phrase_at(&self, from: usize, time: f64) -> Option<usize> {
        self.od_phrases
            .iter()
            .enumerate()
            .skip(from)
            .take_while(|(_, p)| p.start <= time)
            .find(|(_, p)| p.contains(time))
            .map(|(i, _)| i)
    }

    /// Phrase whose note range holds `note_idx`, searching forward from `from`.
    pub fn phrase_for_note(&self, from: usize, note_idx: usize) -> Option<usize> {
        self.od_phrases
            .iter()
            .enumerate()
            .skip(from)
            .take_while(|(_, p)| p.notes.start <= note_idx)
            .find(|(_, p)| p.notes.contains(&note_idx))
            .map(|(i, _)| i)
    }

    pub fn solo_for_note(&self, from: usize, note_idx: usize) -> Option<usize> {
        self.solos
            .iter()
            .enumerate()
            .skip(from)
            .take_while(|(_, s)| s.notes.start <= note_idx)
            .find(|(_, s)| s.notes.contains(&note_idx))
            .map(|(i, _)| i)
    }

    /// Drops a phrase's completion bonus and its overdrive highlighting.
    pub fn forfeit_phrase(&mut self, idx: usize) {
        let Some(phrase) = self.od_phrases.get_mut(idx) else {
            return;
        };
        if phrase.added {
            return;
        }
        phrase.missed = true;
        let range = phrase.notes.clone();
        for note in &mut self.notes[range] {
            note.render_as_od = false;
        }
    }

    pub fn bpm_at_index(&self, idx: usize) -> f64 {
        self.bpms.get(idx).map_or(DEFAULT_BPM, |b| b.bpm)
    }

    pub fn note_views(&self) -> impl Iterator<Item = NoteView> + '_ {
        self.notes.iter().map(Note::view)
    }

    /// Time of the last judgable moment in the chart.
    pub fn last_note_end(&self) -> f64 {
        self.notes.iter().map(Note::end_time).fold(0.0, f64::max)
    }
}

fn validate_bpms(bpms: Vec<BpmChange>) -> Result<Vec<BpmChange>, ChartError> {
    for (index, change) in bpms.iter().enumerate() {
        if !change.bpm.is_finite() || change.bpm <= 0.0 {
            return Err(ChartError::InvalidBpm {
                index,
                bpm: change.bpm,
            });
        }
        if !change.time.is_finite() || (index > 0 && change.time < bpms[index - 1].time) {
            return Err(ChartError::UnorderedBpm {
                index,
                time: change.time,
            });
        }
    }
    if bpms.is_empty() {
        return Ok(vec![BpmChange {
            time: 0.0,
            bpm: DEFAULT_BPM,
        }]);
    }
    Ok(bpms)
}

fn validate_ranges(
    kind: &'static str,
    ranges: &[TimeRange],
) -> Result<Vec<(f64, f64)>, ChartError> {
    let mut out = Vec::with_capacity(ranges.len());
    let mut prev_end = f64::NEG_INFINITY;
    for (index, r) in ranges.iter().enumerate() {
        if !r.start.is_finite() || !r.end.is_finite() || r.end <= r.start {
            return Err(ChartError::EmptyRange {
                kind,
                index,
                start: r.start,
                end: r.end,
            });
        }
        if r.start < prev_end {
            return Err(ChartError::OverlappingRange {
                kind,
                index,
                start: r.start,
                prev_end,
            });
        }
        prev_end = r.end;
        out.push((r.start, r.end));
    }
    Ok(out)
}

fn note_range(notes: &[Note], start: f64, end: f64) -> Range<usize> {
    let lo = notes.partition_point(|n| n.time < start);
    let hi = notes.partition_point(|n| n.time < end);
    lo..hi
}

/// Groups simultaneous notes into chord rows, filling `chord` and `mask`.
fn assign_chords(notes: &mut [Note], layout: &LaneLayout) -> Result<(), ChartError> {
    let mut row_start = 0;
    while row_start < notes.len() {
        let row_time = notes[row_start].time;
        let mut row_end = row_start;
        let mut mask = FretMask::empty();
        while row_end < notes.len() && notes[row_end].time - row_time <= CHORD_TIME_EPSILON {
            let bit = layout.mask(notes[row_end].lane);
            if mask.contains(bit) {
                return Err(ChartError::DuplicateNote {
                    lane: notes[row_end].lane,
                    time: notes[row_end].time,
                });
            }
            mask |= bit;
            row_end += 1;
        }
        let chord = row_end - row_start > 1;
        for note in &mut notes[row_start..row_end] {
            note.chord = chord;
            note.mask = if chord { mask } else { layout.mask(note.lane) };
        }
        row_start = row_end;
    }
    Ok(())
}

/// Beat position of `time` under a validated tempo map, counted from 0s.
/// The first tempo applies to everything before the first change.
pub fn beat_at(bpms: &[BpmChange], time: f64) -> f64 {
    let Some(first) = bpms.first() else {
        return time * DEFAULT_BPM / 60.0;
    };
    let mut beat = 0.0;
    let mut seg_time = 0.0;
    let mut seg_bpm = first.bpm;
    for change in bpms {
        if change.time >= time {
            break;
        }
        if change.time > seg_time {
            beat += (change.time - seg_time) * seg_bpm / 60.0;
            seg_time = change.time;
        }
        seg_bpm = change.bpm;
    }
    beat + (time - seg_time) * seg_bpm / 60.0
}
