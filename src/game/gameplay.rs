use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::game::band::BandState;
use crate::game::chart::Chart;
use crate::game::judgment::{self, JudgeEvent, JudgeOutcome};
use crate::game::note::{FretMask, MAX_LANES, NoteView};
use crate::game::scoring::{Instrument, PlayerStats, SoloResult, bpm_index_at};
use crate::game::stage_stats::{PlayerStageSummary, StageSummary, StarRating};
use crate::game::timing_windows::TimingPolicy;

pub const MAX_PLAYERS: usize = 4;
/// A solo's result is recorded this long after it ends.
pub const SOLO_RESULT_DELAY_S: f64 = 2.5;

/// Judgment policies that apply to every player in a session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayOptions {
    pub chord_matching: bool,
    pub extended_sustain: bool,
    pub overdrive_strum: bool,
    pub bot_perfect: bool,
}

impl PlayOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            chord_matching: cfg.chord_matching,
            extended_sustain: cfg.extended_sustain,
            overdrive_strum: cfg.overdrive_strum,
            bot_perfect: cfg.bot_perfect,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    #[default]
    Primary,
    Alternate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputTarget {
    Lane(usize),
    Overdrive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Press,
    Release,
}

/// One physical edge from one binding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InputEdge {
    pub target: InputTarget,
    pub action: InputAction,
    pub binding: Binding,
}

/// What a session needs to seat one player.
#[derive(Clone, Debug)]
pub struct PlayerSetup {
    pub chart: Chart,
    pub instrument: Instrument,
    pub bot: bool,
    /// Per-player calibration; falls back to the session policy's offset.
    pub input_offset: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PlayerRuntime {
    pub chart: Chart,
    pub stats: PlayerStats,
    pub policy: TimingPolicy,
    pub bot: bool,
    pub base_score: u64,

    pub active_holds: [Option<usize>; MAX_LANES],
    pub overhit_latch: [bool; MAX_LANES],
    /// Note time of the last lift hit by a release, per lane.
    pub last_lift_hit: [Option<f64>; MAX_LANES],
    pub overdrive_held: [bool; 2],
    /// Lanes played by the last overdrive strum, settled on overdrive release.
    pub overdrive_lanes: [bool; MAX_LANES],
    bot_cursor: usize,
}

impl PlayerRuntime {
    pub fn new(chart: Chart, instrument: Instrument, policy: TimingPolicy, bot: bool) -> Self {
        let base_score = match chart.base_score {
            Some(score) => u64::from(score),
            None => simulate_base_score(&chart, instrument, policy),
        };
        let mut stats = PlayerStats::new(instrument);
        // Bot runs never count as a full combo.
        stats.fc = !bot;
        Self {
            chart,
            stats,
            policy,
            bot,
            base_score,
            active_holds: [None; MAX_LANES],
            overhit_latch: [false; MAX_LANES],
            last_lift_hit: [None; MAX_LANES],
            overdrive_held: [false; 2],
            overdrive_lanes: [false; MAX_LANES],
            bot_cursor: 0,
        }
    }

    pub fn reset(&mut self) {
        self.chart.reset_judgments();
        self.stats.reset();
        self.stats.fc = !self.bot;
        self.active_holds = [None; MAX_LANES];
        self.overhit_latch = [false; MAX_LANES];
        self.last_lift_hit = [None; MAX_LANES];
        self.overdrive_held = [false; 2];
        self.overdrive_lanes = [false; MAX_LANES];
        self.bot_cursor = 0;
    }

    /// Frets held on either binding.
    pub fn held_mask(&self) -> FretMask {
        let mut down = [false; MAX_LANES];
        for (lane, d) in down.iter_mut().enumerate() {
            *d = self.stats.lane_down(lane);
        }
        self.chart.layout.mask_of(&down)
    }

    /// Records a binding edge and returns the logical event, if the lane (or
    /// overdrive control) actually changed state.
    pub fn apply_edge(&mut self, edge: InputEdge) -> Option<JudgeEvent> {
        let pressed = edge.action == InputAction::Press;
        match edge.target {
            InputTarget::Lane(lane) => {
                if lane >= self.chart.lane_count() {
                    return None;
                }
                let was_down = self.stats.lane_down(lane);
                match edge.binding {
                    Binding::Primary => self.stats.held_frets[lane] = pressed,
                    Binding::Alternate => self.stats.held_frets_alt[lane] = pressed,
                }
                let is_down = self.stats.lane_down(lane);
                match (was_down, is_down) {
                    (false, true) => Some(JudgeEvent::Press { lane }),
                    (true, false) => Some(JudgeEvent::Release { lane }),
                    _ => None,
                }
            }
            InputTarget::Overdrive => {
                let was_down = self.overdrive_held.iter().any(|&d| d);
                self.overdrive_held[edge.binding as usize] = pressed;
                let is_down = self.overdrive_held.iter().any(|&d| d);
                match (was_down, is_down) {
                    (false, true) => Some(JudgeEvent::OverdrivePress),
                    (true, false) => Some(JudgeEvent::OverdriveRelease),
                    _ => None,
                }
            }
        }
    }

    /// True once every note is resolved and no sustain is still running.
    pub fn is_finished(&self) -> bool {
        self.active_holds.iter().all(Option::is_none) && self.chart.notes.iter().all(|n| n.accounted)
    }

    pub fn snapshot(&self, star_thresholds: &[f64; 6]) -> PlayerSnapshot {
        let s = &self.stats;
        let score = s.display_score();
        PlayerSnapshot {
            score,
            combo: s.combo,
            max_combo: s.max_combo,
            multiplier: s.multiplier(),
            combo_fill: s.combo_fill(),
            multiplier_fill: s.multiplier_fill(),
            overdrive_fill: s.overdrive_fill,
            overdrive: s.overdrive,
            fc: s.fc,
            notes_hit: s.notes_hit,
            notes_missed: s.notes_missed,
            perfect_hit: s.perfect_hit,
            strikes: s.strikes,
            bpm: self.chart.bpm_at_index(s.cur_bpm),
            stars: StarRating::compute(score, self.base_score, star_thresholds),
        }
    }
}

/// Read-only view of a player's progression for renderers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
    pub multiplier: u32,
    pub combo_fill: f64,
    pub multiplier_fill: f64,
    pub overdrive_fill: f64,
    pub overdrive: bool,
    pub fc: bool,
    pub notes_hit: u32,
    pub notes_missed: u32,
    pub perfect_hit: u32,
    pub strikes: u32,
    pub bpm: f64,
    pub stars: StarRating,
}

/// Timed things the advancer resolves in playback order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Happening {
    SustainEnd { lane: usize },
    AutoHit { note: usize },
    Miss { note: usize },
}

#[inline(always)]
fn earlier(best: &mut Option<(f64, Happening)>, time: f64, happening: Happening) {
    if best.is_none_or(|(b, _)| time < b) {
        *best = Some((time, happening));
    }
}

fn next_happening(p: &mut PlayerRuntime, t: f64) -> Option<(f64, Happening)> {
    let mut best = None;
    for (lane, hold) in p.active_holds.iter().enumerate() {
        if let Some(idx) = *hold {
            let end = p.chart.notes[idx].end_time();
            if end <= t {
                earlier(&mut best, end, Happening::SustainEnd { lane });
            }
        }
    }

    if p.bot {
        while p.bot_cursor < p.chart.notes.len() && p.chart.notes[p.bot_cursor].accounted {
            p.bot_cursor += 1;
        }
        if let Some(note) = p.chart.notes.get(p.bot_cursor)
            && note.time <= t
        {
            earlier(&mut best, note.time, Happening::AutoHit { note: p.bot_cursor });
        }
    }

    let offset = p.policy.input_offset();
    for (lane, lane_notes) in p.chart.notes_per_lane.iter().enumerate() {
        for &idx in &lane_notes[p.stats.cur_note_idx[lane]..] {
            let note = &p.chart.notes[idx];
            if note.time + offset > t {
                break;
            }
            if note.accounted || !p.policy.window_elapsed(note.lift, note.time, t) {
                continue;
            }
            earlier(
                &mut best,
                p.policy.late_edge(note.lift, note.time),
                Happening::Miss { note: idx },
            );
        }
    }
    best
}

fn register_miss(p: &mut PlayerRuntime, idx: usize, at: f64) {
    let note = &mut p.chart.notes[idx];
    note.miss = true;
    note.accounted = true;
    let lane = note.lane;
    p.stats.miss_note();
    if let Some(phrase) = p.chart.phrase_for_note(p.stats.cur_od_phrase, idx) {
        p.chart.forfeit_phrase(phrase);
    }
    debug!("MISSED (time-based): lane {lane}, note {idx} at {at:.4}s");
}

/// Runs one player's chart state forward to `t`. Everything here depends only
/// on playback time, never on how often it is called.
pub(crate) fn advance_player(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    t: f64,
) {
    while let Some((at, happening)) = next_happening(p, t) {
        p.stats.tick_overdrive(at, &p.chart.bpms, band);
        match happening {
            Happening::SustainEnd { lane } => {
                let points = judgment::end_hold(p, band, opts, lane, at);
                trace!("Sustain complete: lane {lane} at {at:.4}s (+{points})");
            }
            Happening::AutoHit { note } => {
                judgment::judge(p, band, opts, JudgeEvent::AutoHit { note }, at);
            }
            Happening::Miss { note } => register_miss(p, note, at),
        }
    }

    // Tempo cursor.
    let bpms = &p.chart.bpms;
    let target_bpm = bpm_index_at(bpms, t);
    if target_bpm > p.stats.cur_bpm {
        p.stats.cur_bpm = target_bpm;
        trace!("BPM now {:.2} at {t:.3}s", bpms[target_bpm].bpm);
    }

    p.stats.tick_overdrive(t, &p.chart.bpms, band);

    for lane in 0..p.chart.lane_count() {
        if let Some(idx) = p.active_holds[lane] {
            let note = &mut p.chart.notes[idx];
            note.held_time = (t - note.time).clamp(0.0, note.len);
            let (held_time, len, beats_len) = (note.held_time, note.len, note.beats_len);
            p.stats.buffer_sustain(lane, held_time, len, beats_len);
        }
    }

    for (lane, lane_notes) in p.chart.notes_per_lane.iter().enumerate() {
        let cursor = &mut p.stats.cur_note_idx[lane];
        while let Some(&idx) = lane_notes.get(*cursor) {
            let note = &p.chart.notes[idx];
            if !note.accounted || note.held {
                break;
            }
            *cursor += 1;
        }
    }

    advance_phrases(p, band, t);

    while let Some(solo) = p.chart.solos.get(p.stats.cur_solo) {
        if t - SOLO_RESULT_DELAY_S <= solo.end {
            break;
        }
        info!(
            "Solo finished: {}/{} notes",
            solo.notes_hit, solo.note_count
        );
        p.stats.solo_results.push(SoloResult {
            start: solo.start,
            end: solo.end,
            notes_hit: solo.notes_hit,
            note_count: solo.note_count,
        });
        p.stats.cur_solo += 1;
    }

    while p
        .chart
        .beat_lines
        .get(p.stats.cur_beat_line)
        .is_some_and(|line| line.time <= t)
    {
        p.stats.cur_beat_line += 1;
    }
}

/// Moves the phrase cursor past phrases that have ended and been resolved.
/// An ended phrase that is still unresolved holds the cursor.
fn advance_phrases(p: &mut PlayerRuntime, band: &mut BandState, t: f64) {
    while let Some(phrase) = p.chart.od_phrases.get(p.stats.cur_od_phrase) {
        if t <= phrase.end {
            break;
        }
        if !phrase.is_resolved() {
            let cur = p.stats.cur_od_phrase;
            if phrase.note_count == 0 {
                p.chart.od_phrases[cur].added = true;
            } else {
                judgment::try_complete_phrase(p, band, cur, t);
            }
            if !p.chart.od_phrases[cur].is_resolved() {
                break;
            }
        }
        p.stats.cur_od_phrase += 1;
    }
}

/// Score of a full-combo, non-perfect run without overdrive, holding every
/// sustain to its end.
pub fn simulate_base_score(chart: &Chart, instrument: Instrument, policy: TimingPolicy) -> u64 {
    let mut runtime = PlayerRuntime {
        chart: chart.clone(),
        stats: PlayerStats::new(instrument),
        policy,
        bot: true,
        base_score: 0,
        active_holds: [None; MAX_LANES],
        overhit_latch: [false; MAX_LANES],
        last_lift_hit: [None; MAX_LANES],
        overdrive_held: [false; 2],
        overdrive_lanes: [false; MAX_LANES],
        bot_cursor: 0,
    };
    runtime.chart.reset_judgments();
    let mut band = BandState::new(1);
    let end = chart.last_note_end() + 1.0;
    advance_player(&mut runtime, &mut band, &PlayOptions::default(), end);
    debug!("Computed base score {}", runtime.stats.score);
    runtime.stats.score
}

/// One play session: every seated player plus the shared band state.
#[derive(Clone, Debug)]
pub struct Session {
    players: Vec<PlayerRuntime>,
    band: BandState,
    options: PlayOptions,
    policy: TimingPolicy,
    star_thresholds: [f64; 6],
    music_time: f64,
}

impl Session {
    pub fn new(
        setups: Vec<PlayerSetup>,
        policy: TimingPolicy,
        options: PlayOptions,
        star_thresholds: [f64; 6],
    ) -> Self {
        let players: Vec<PlayerRuntime> = setups
            .into_iter()
            .take(MAX_PLAYERS)
            .map(|setup| {
                let player_policy = match setup.input_offset {
                    Some(offset) => policy.with_input_offset(offset).unwrap_or_else(|e| {
                        warn!("Ignoring player input offset: {e}");
                        policy
                    }),
                    None => policy,
                };
                PlayerRuntime::new(setup.chart, setup.instrument, player_policy, setup.bot)
            })
            .collect();
        info!("Session created with {} player(s)", players.len());
        Self {
            band: BandState::new(players.len()),
            players,
            options,
            policy,
            star_thresholds,
            music_time: f64::NEG_INFINITY,
        }
    }

    pub fn from_config(setups: Vec<PlayerSetup>, cfg: &Config) -> Self {
        Self::new(setups, cfg.timing, PlayOptions::from_config(cfg), cfg.star_thresholds)
    }

    #[inline(always)]
    pub fn music_time(&self) -> f64 {
        self.music_time
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, idx: usize) -> Option<&PlayerRuntime> {
        self.players.get(idx)
    }

    pub fn band(&self) -> &BandState {
        &self.band
    }

    pub fn options(&self) -> &PlayOptions {
        &self.options
    }

    /// Puts every note flag, cursor and counter back to its initial value.
    pub fn reset(&mut self) {
        for p in &mut self.players {
            p.reset();
        }
        self.band.reset();
        self.music_time = f64::NEG_INFINITY;
        info!("Session reset");
    }

    /// Frame entry point. Playback time never runs backwards; an older `t`
    /// is ignored.
    pub fn advance(&mut self, t: f64) {
        if t < self.music_time {
            trace!("Ignoring advance to {t:.4}s (now {:.4}s)", self.music_time);
            return;
        }
        self.music_time = t;
        for p in &mut self.players {
            advance_player(p, &mut self.band, &self.options, t);
        }
    }

    /// Input entry point. The chart is first advanced to the event time so
    /// judgment order matches playback order.
    pub fn handle_input(&mut self, player: usize, edge: InputEdge, t: f64) -> JudgeOutcome {
        self.advance(t);
        let Some(p) = self.players.get_mut(player) else {
            warn!("Input for unknown player {player}");
            return JudgeOutcome::Ignored;
        };
        let Some(event) = p.apply_edge(edge) else {
            return JudgeOutcome::Ignored;
        };
        judgment::judge(p, &mut self.band, &self.options, event, t)
    }

    pub fn snapshot(&self, player: usize) -> Option<PlayerSnapshot> {
        self.players
            .get(player)
            .map(|p| p.snapshot(&self.star_thresholds))
    }

    pub fn note_views(&self, player: usize) -> Vec<NoteView> {
        self.players
            .get(player)
            .map(|p| p.chart.note_views().collect())
            .unwrap_or_default()
    }

    /// Renderer time base. Judgment never reads this.
    pub fn visual_time(&self, music_time: f64) -> f64 {
        self.policy.visual_time(music_time)
    }

    pub fn is_finished(&self) -> bool {
        self.players.iter().all(PlayerRuntime::is_finished)
    }

    /// Last moment any player's chart can still change.
    pub fn last_judgable_time(&self) -> f64 {
        self.players
            .iter()
            .map(|p| {
                let late = p.policy.late_edge(true, 0.0).max(0.0);
                p.chart.last_note_end() + late
            })
            .fold(0.0, f64::max)
    }

    pub fn summary(&self) -> StageSummary {
        let players = self
            .players
            .iter()
            .map(|p| PlayerStageSummary::from_stats(&p.stats, p.base_score, &self.star_thresholds))
            .collect();
        StageSummary::new(self.music_time.max(0.0), &self.band, players)
    }
}
