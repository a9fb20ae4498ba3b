use log::{debug, info, trace};
use smallvec::{SmallVec, smallvec};

use crate::game::band::BandState;
use crate::game::chart::CHORD_TIME_EPSILON;
use crate::game::gameplay::{PlayOptions, PlayerRuntime};
use crate::game::note::{FretMask, MAX_LANES};
use crate::game::timing_windows::{LIFT_REPRESS_GUARD_S, OVERDRIVE_GRACE_S, WindowKind};

pub type NoteList = SmallVec<[usize; MAX_LANES]>;

/// A logical input after binding resolution, or a synthetic bot hit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JudgeEvent {
    Press { lane: usize },
    Release { lane: usize },
    OverdrivePress,
    OverdriveRelease,
    AutoHit { note: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum JudgeOutcome {
    Hit { notes: NoteList, perfect: bool },
    Overhit { lane: usize },
    OverdriveActivated { strummed: NoteList },
    SustainDropped { note: usize, points: u64 },
    Ignored,
}

/// Single entry point for every judgment. The caller has already advanced
/// the player's chart state up to `t`.
pub fn judge(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    event: JudgeEvent,
    t: f64,
) -> JudgeOutcome {
    trace!("judge {event:?} at {t:.4}s");
    match event {
        JudgeEvent::Press { lane } => judge_press(p, band, opts, lane, t),
        JudgeEvent::Release { lane } => judge_release(p, band, opts, lane, t),
        JudgeEvent::OverdrivePress => judge_overdrive_press(p, band, opts, t),
        JudgeEvent::OverdriveRelease => judge_overdrive_release(p, band, opts, t),
        JudgeEvent::AutoHit { note } => auto_hit(p, band, opts, note, t),
    }
}

#[inline(always)]
fn matches_frets(mask: FretMask, chord: bool, held: FretMask, extended: bool) -> bool {
    if chord {
        mask.chord_match(held, extended)
    } else {
        mask.single_match(held, extended)
    }
}

#[inline(always)]
fn extended_active(p: &PlayerRuntime, opts: &PlayOptions) -> bool {
    opts.extended_sustain && p.stats.extended_sustain_active
}

/// First unresolved press-judged note in `lane` whose window holds `t`, and
/// whether an unresolved lift was in its release window on the way.
fn press_candidate(p: &PlayerRuntime, lane: usize, t: f64) -> (Option<usize>, bool) {
    let mut lift_in_window = false;
    let Some(lane_notes) = p.chart.notes_per_lane.get(lane) else {
        return (None, false);
    };
    for &idx in &lane_notes[p.stats.cur_note_idx[lane]..] {
        let note = &p.chart.notes[idx];
        if p.policy.window_not_open(WindowKind::LiftRelease, note.time, t) {
            break;
        }
        if note.hit || note.accounted {
            continue;
        }
        if note.lift {
            lift_in_window |= p.policy.in_good_window(WindowKind::LiftRelease, note.time, t);
            continue;
        }
        if p.policy.in_good_window(WindowKind::Press, note.time, t) {
            return (Some(idx), lift_in_window);
        }
    }
    (None, lift_in_window)
}

/// Unresolved notes sharing the row of `idx`, across every lane.
fn chord_row(p: &PlayerRuntime, idx: usize, with_lifts: bool) -> NoteList {
    let notes = &p.chart.notes;
    let time = notes[idx].time;
    let mut start = idx;
    while start > 0 && time - notes[start - 1].time <= CHORD_TIME_EPSILON {
        start -= 1;
    }
    notes[start..]
        .iter()
        .enumerate()
        .take_while(|(_, n)| n.time - time <= CHORD_TIME_EPSILON)
        .filter(|(_, n)| !n.hit && !n.accounted && (with_lifts || !n.lift))
        .map(|(i, _)| start + i)
        .collect()
}

fn judge_press(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    lane: usize,
    t: f64,
) -> JudgeOutcome {
    if lane >= p.chart.lane_count() {
        return JudgeOutcome::Ignored;
    }
    let (candidate, lift_in_window) = press_candidate(p, lane, t);
    let Some(idx) = candidate else {
        return overhit_or_ignore(p, lane, t, lift_in_window);
    };

    let note = &p.chart.notes[idx];
    let notes: NoteList = if opts.chord_matching {
        let held = p.held_mask();
        let extended = extended_active(p, opts);
        if !matches_frets(note.mask, note.chord, held, extended) {
            // Still building the chord shape.
            if note.chord && note.mask.contains(held) {
                return JudgeOutcome::Ignored;
            }
            return overhit_or_ignore(p, lane, t, false);
        }
        if note.chord {
            chord_row(p, idx, false)
        } else {
            smallvec![idx]
        }
    } else {
        smallvec![idx]
    };

    let perfect = p.policy.in_perfect_window(p.chart.notes[idx].time, t);
    for &n in &notes {
        register_hit(p, band, opts, n, t, perfect);
    }
    recheck_held_sustains(p, band, opts, t);
    JudgeOutcome::Hit { notes, perfect }
}

fn judge_release(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    lane: usize,
    t: f64,
) -> JudgeOutcome {
    if lane >= p.chart.lane_count() {
        return JudgeOutcome::Ignored;
    }
    p.overhit_latch[lane] = false;

    let mut outcome = JudgeOutcome::Ignored;
    if let Some(note) = p.active_holds[lane] {
        let points = end_hold(p, band, opts, lane, t);
        debug!("SUSTAIN DROPPED: lane {lane}, note {note} at {t:.4}s (+{points})");
        outcome = JudgeOutcome::SustainDropped { note, points };
    }

    if let Some(idx) = lift_candidate(p, lane, t) {
        let perfect = hit_lift(p, band, opts, lane, idx, t);
        outcome = JudgeOutcome::Hit {
            notes: smallvec![idx],
            perfect,
        };
    }

    recheck_held_sustains(p, band, opts, t);
    outcome
}

/// First unresolved lift in `lane` whose release window holds `t`.
fn lift_candidate(p: &PlayerRuntime, lane: usize, t: f64) -> Option<usize> {
    p.chart.notes_per_lane.get(lane)?[p.stats.cur_note_idx[lane]..]
        .iter()
        .copied()
        .take_while(|&idx| {
            !p.policy
                .window_not_open(WindowKind::LiftRelease, p.chart.notes[idx].time, t)
        })
        .find(|&idx| {
            let note = &p.chart.notes[idx];
            note.lift
                && !note.hit
                && !note.accounted
                && p.policy.in_good_window(WindowKind::LiftRelease, note.time, t)
        })
}

fn hit_lift(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    lane: usize,
    idx: usize,
    t: f64,
) -> bool {
    let note_time = p.chart.notes[idx].time;
    let perfect = p.policy.in_perfect_window(note_time, t);
    register_hit(p, band, opts, idx, t, perfect);
    p.last_lift_hit[lane] = Some(note_time);
    perfect
}

fn judge_overdrive_press(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    t: f64,
) -> JudgeOutcome {
    if !p.stats.activate_overdrive(t, band) {
        return JudgeOutcome::Ignored;
    }
    let strummed = if opts.overdrive_strum {
        overdrive_strum(p, band, opts, t)
    } else {
        NoteList::new()
    };
    JudgeOutcome::OverdriveActivated { strummed }
}

/// First unresolved note in `lane`, lift or not, whose press window holds `t`.
fn strum_candidate(p: &PlayerRuntime, lane: usize, t: f64) -> Option<usize> {
    p.chart.notes_per_lane.get(lane)?[p.stats.cur_note_idx[lane]..]
        .iter()
        .copied()
        .take_while(|&idx| {
            !p.policy
                .window_not_open(WindowKind::Press, p.chart.notes[idx].time, t)
        })
        .find(|&idx| {
            let note = &p.chart.notes[idx];
            !note.hit && !note.accounted && p.policy.in_good_window(WindowKind::Press, note.time, t)
        })
}

/// The activating press also plays the earliest in-window row. Lifts in the
/// row are left for the overdrive release; every lane of the row is
/// remembered for it.
fn overdrive_strum(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    t: f64,
) -> NoteList {
    p.overdrive_lanes = [false; MAX_LANES];
    let Some(first) = (0..p.chart.lane_count())
        .filter_map(|lane| strum_candidate(p, lane, t))
        .min_by(|&a, &b| p.chart.notes[a].time.total_cmp(&p.chart.notes[b].time))
    else {
        return NoteList::new();
    };
    let row: NoteList = chord_row(p, first, true)
        .into_iter()
        .filter(|&idx| {
            p.policy
                .in_good_window(WindowKind::Press, p.chart.notes[idx].time, t)
        })
        .collect();
    let perfect = p.policy.in_perfect_window(p.chart.notes[first].time, t);
    let mut strummed = NoteList::new();
    for &idx in &row {
        let note = &p.chart.notes[idx];
        p.overdrive_lanes[note.lane] = true;
        if !note.lift {
            register_hit(p, band, opts, idx, t, perfect);
            strummed.push(idx);
        }
    }
    debug!(
        "Overdrive strum hit {} of {} note(s) at {t:.4}s",
        strummed.len(),
        row.len()
    );
    strummed
}

/// Releasing the overdrive control after a strum plays the lifts of the
/// strummed lanes and lets go of strummed sustains no fret is holding.
fn judge_overdrive_release(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    t: f64,
) -> JudgeOutcome {
    let lanes = std::mem::take(&mut p.overdrive_lanes);
    let mut hits = NoteList::new();
    let mut perfect = false;
    let mut dropped = None;
    for lane in (0..p.chart.lane_count()).filter(|&lane| lanes[lane]) {
        if let Some(idx) = lift_candidate(p, lane, t) {
            perfect |= hit_lift(p, band, opts, lane, idx, t);
            hits.push(idx);
        }
        if let Some(note) = p.active_holds[lane]
            && !p.stats.lane_down(lane)
        {
            let points = end_hold(p, band, opts, lane, t);
            debug!("SUSTAIN DROPPED (overdrive release): lane {lane} at {t:.4}s (+{points})");
            if dropped.is_none() {
                dropped = Some(JudgeOutcome::SustainDropped { note, points });
            }
        }
    }
    if !hits.is_empty() {
        return JudgeOutcome::Hit { notes: hits, perfect };
    }
    dropped.unwrap_or(JudgeOutcome::Ignored)
}

fn auto_hit(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    idx: usize,
    t: f64,
) -> JudgeOutcome {
    match p.chart.notes.get(idx) {
        Some(note) if !note.hit && !note.accounted => {}
        _ => return JudgeOutcome::Ignored,
    }
    register_hit(p, band, opts, idx, t, opts.bot_perfect);
    JudgeOutcome::Hit {
        notes: smallvec![idx],
        perfect: opts.bot_perfect,
    }
}

fn overhit_or_ignore(p: &mut PlayerRuntime, lane: usize, t: f64, lift_in_window: bool) -> JudgeOutcome {
    let guarded = lift_in_window
        || t <= p.chart.music_start
        || t <= p.stats.overdrive_hit_time + OVERDRIVE_GRACE_S
        || p.overhit_latch[lane]
        || p.last_lift_hit[lane].is_some_and(|lt| (t - lt).abs() <= LIFT_REPRESS_GUARD_S);
    if guarded {
        return JudgeOutcome::Ignored;
    }
    p.stats.overhit();
    p.overhit_latch[lane] = true;
    if let Some(phrase) = p.chart.od_phrase_at(p.stats.cur_od_phrase, t)
        && !p.chart.od_phrases[phrase].is_resolved()
    {
        p.chart.forfeit_phrase(phrase);
        p.stats.miss_note();
        debug!("Overdrive phrase {phrase} forfeited by overhit");
    }
    debug!("OVERHIT: lane {lane} at {t:.4}s");
    JudgeOutcome::Overhit { lane }
}

fn register_hit(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    idx: usize,
    t: f64,
    perfect: bool,
) {
    let lane = p.chart.notes[idx].lane;
    if p.active_holds[lane].is_some() {
        end_hold(p, band, opts, lane, t);
    }

    let note = &mut p.chart.notes[idx];
    note.hit = true;
    note.accounted = true;
    note.hit_time = t;
    note.perfect = perfect;
    let err_ms = (t - note.time) * 1000.0;
    if note.is_sustain() && !note.lift {
        note.held = true;
        note.held_time = 0.0;
        if note.extended_sustain && opts.extended_sustain {
            p.stats.extended_sustain_active = true;
        }
        p.active_holds[lane] = Some(idx);
    }

    p.stats.hit_note(perfect, band);
    credit_phrase_and_solo(p, band, idx, t);
    debug!(
        "TIMING HIT: lane {lane}, note {idx}, err {err_ms:+.1}ms{}",
        if perfect { " (perfect)" } else { "" }
    );
}

fn credit_phrase_and_solo(p: &mut PlayerRuntime, band: &mut BandState, idx: usize, at: f64) {
    if let Some(phrase) = p.chart.phrase_for_note(p.stats.cur_od_phrase, idx) {
        if !p.chart.notes[idx].counted_for_od_phrase {
            p.chart.notes[idx].counted_for_od_phrase = true;
            p.chart.od_phrases[phrase].notes_hit += 1;
        }
        try_complete_phrase(p, band, phrase, at);
    }
    if let Some(solo) = p.chart.solo_for_note(p.stats.cur_solo, idx)
        && !p.chart.notes[idx].counted_for_solo
    {
        p.chart.notes[idx].counted_for_solo = true;
        p.chart.solos[solo].notes_hit += 1;
    }
}

/// Credits a phrase once every note in it has been hit. `added` makes this
/// idempotent.
pub(crate) fn try_complete_phrase(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    phrase: usize,
    at: f64,
) {
    let Some(ph) = p.chart.od_phrases.get_mut(phrase) else {
        return;
    };
    if ph.is_resolved() || ph.notes_hit < ph.note_count {
        return;
    }
    ph.added = true;
    let note_count = ph.note_count;
    let gained = p.stats.add_phrase_fill(at, &p.chart.bpms, band);
    info!(
        "Overdrive phrase {phrase} complete ({note_count} notes), fill now {:.0}%{}",
        p.stats.overdrive_fill * 100.0,
        if gained { "" } else { " (meter full)" }
    );
}

/// Ends the hold on `lane` at `t`, keeping credit for the time actually held.
/// Returns the points committed.
pub(crate) fn end_hold(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    lane: usize,
    t: f64,
) -> u64 {
    let Some(idx) = p.active_holds.get_mut(lane).and_then(Option::take) else {
        return 0;
    };
    let note = &mut p.chart.notes[idx];
    let held_time = (t - note.time).clamp(0.0, note.len);
    note.held_time = held_time;
    note.held = false;
    let (len, beats_len) = (note.len, note.beats_len);
    p.stats.buffer_sustain(lane, held_time, len, beats_len);
    let points = p.stats.commit_sustain(lane, band);
    p.stats.extended_sustain_active = opts.extended_sustain
        && p.active_holds
            .iter()
            .flatten()
            .any(|&i| p.chart.notes[i].extended_sustain);
    points
}

/// Drops every player-held sustain once the fret shape no longer fits it.
fn recheck_held_sustains(
    p: &mut PlayerRuntime,
    band: &mut BandState,
    opts: &PlayOptions,
    t: f64,
) {
    if !opts.chord_matching {
        return;
    }
    let layout = p.chart.layout;
    let sustain_mask = p
        .active_holds
        .iter()
        .enumerate()
        .filter(|(_, hold)| hold.is_some())
        .fold(FretMask::empty(), |acc, (lane, _)| acc | layout.mask(lane));
    if sustain_mask.is_empty() {
        return;
    }
    let held = p.held_mask();
    let chord = sustain_mask.bits().count_ones() > 1;
    if matches_frets(sustain_mask, chord, held, extended_active(p, opts)) {
        return;
    }
    for lane in 0..layout.lane_count {
        if p.active_holds[lane].is_some() {
            let points = end_hold(p, band, opts, lane, t);
            debug!("SUSTAIN DROPPED (fret change): lane {lane} at {t:.4}s (+{points})");
        }
    }
}
