use fretline::game::chart::{Chart, ChartData, TimeRange};
use fretline::game::gameplay::{
    Binding, InputAction, InputEdge, InputTarget, PlayOptions, PlayerSetup, Session,
};
use fretline::game::judgment::JudgeOutcome;
use fretline::game::note::NoteData;
use fretline::game::scoring::Instrument;
use fretline::game::stage_stats::DEFAULT_STAR_THRESHOLDS;
use fretline::game::timing_windows::{HitWindow, TimingPolicy};
use proptest::prelude::*;

fn policy() -> TimingPolicy {
    TimingPolicy::new(
        HitWindow { back: 0.07, front: 0.07 },
        HitWindow { back: 0.02, front: 0.02 },
        1.25,
        0.0,
        0.0,
    )
    .unwrap()
}

fn tap(lane: u8, time: f64) -> NoteData {
    NoteData {
        lane,
        time,
        ..NoteData::default()
    }
}

fn session(data: ChartData) -> Session {
    Session::new(
        vec![PlayerSetup {
            chart: Chart::from_data(data).unwrap(),
            instrument: Instrument::Guitar,
            bot: false,
            input_offset: None,
        }],
        policy(),
        PlayOptions::default(),
        DEFAULT_STAR_THRESHOLDS,
    )
}

fn five_lane(notes: Vec<NoteData>) -> ChartData {
    ChartData {
        lane_count: 5,
        notes,
        ..ChartData::default()
    }
}

fn press(s: &mut Session, lane: usize, t: f64) -> JudgeOutcome {
    s.handle_input(
        0,
        InputEdge {
            target: InputTarget::Lane(lane),
            action: InputAction::Press,
            binding: Binding::Primary,
        },
        t,
    )
}

fn release(s: &mut Session, lane: usize, t: f64) -> JudgeOutcome {
    s.handle_input(
        0,
        InputEdge {
            target: InputTarget::Lane(lane),
            action: InputAction::Release,
            binding: Binding::Primary,
        },
        t,
    )
}

#[test]
fn late_press_inside_good_window_is_a_plain_hit() {
    let mut s = session(five_lane(vec![tap(0, 10.0)]));
    let out = press(&mut s, 0, 10.05);
    assert!(matches!(out, JudgeOutcome::Hit { perfect: false, .. }));
    let p = s.player(0).unwrap();
    assert!(p.chart.notes[0].hit && !p.chart.notes[0].perfect);
    assert_eq!((p.stats.score, p.stats.combo), (30, 1));
    assert_eq!(p.stats.perfect_hit, 0);
}

#[test]
fn press_past_the_window_never_hits() {
    let mut s = session(five_lane(vec![tap(0, 10.0)]));
    s.advance(10.0625);
    assert!(!s.player(0).unwrap().chart.notes[0].accounted);

    press(&mut s, 0, 10.08);
    let p = s.player(0).unwrap();
    let note = &p.chart.notes[0];
    assert!(!note.hit && note.miss && note.accounted);
    assert_eq!((p.stats.notes_hit, p.stats.notes_missed), (0, 1));
    assert!(!p.stats.fc);
}

#[test]
fn early_release_keeps_partial_sustain_credit() {
    let mut hold = tap(2, 5.0);
    hold.len = 2.0;
    let mut s = session(five_lane(vec![hold]));
    press(&mut s, 2, 5.0);
    s.advance(5.5);
    assert!(s.player(0).unwrap().stats.buffered_sustain_score() > 0.0);

    let out = release(&mut s, 2, 6.0);
    assert!(matches!(out, JudgeOutcome::SustainDropped { note: 0, points: 24 }));
    let p = s.player(0).unwrap();
    assert!(!p.chart.notes[0].held);
    assert_eq!(p.stats.sustain_score_buffer, [0.0; 5]);
    // Half of a four-beat sustain at 1x on top of the tap.
    assert_eq!(p.stats.score, 30 + 24);
}

#[test]
fn completed_phrase_fills_overdrive_once() {
    let notes = (0..4).map(|i| tap(i, 1.0 + f64::from(i) * 0.5)).collect();
    let mut data = five_lane(notes);
    data.od_phrases = vec![TimeRange { start: 0.9, end: 3.0 }];
    let mut s = session(data);

    for i in 0..4 {
        let t = 1.0 + f64::from(i) * 0.5;
        press(&mut s, i as usize, t);
        release(&mut s, i as usize, t + 0.1);
    }
    let fill = s.player(0).unwrap().stats.overdrive_fill;
    assert_eq!(fill, 0.25);

    s.advance(3.5);
    let p = s.player(0).unwrap();
    assert!(p.chart.od_phrases[0].added);
    assert_eq!(p.stats.overdrive_fill, 0.25);
    assert_eq!(p.stats.cur_od_phrase, 1);
}

#[test]
fn overhit_inside_phrase_forfeits_it() {
    let mut data = five_lane(vec![tap(0, 1.0), tap(1, 3.5)]);
    data.od_phrases = vec![TimeRange { start: 2.5, end: 4.0 }];
    let mut s = session(data);
    press(&mut s, 0, 1.0);
    release(&mut s, 0, 1.1);

    let out = press(&mut s, 3, 3.0);
    assert_eq!(out, JudgeOutcome::Overhit { lane: 3 });
    let p = s.player(0).unwrap();
    // Forfeiting the phrase is booked as a miss.
    assert_eq!((p.stats.strikes, p.stats.combo), (1, 0));
    assert_eq!(p.stats.notes_missed, 1);
    assert!(!p.stats.fc);
    assert!(p.chart.od_phrases[0].missed);
    assert!(!p.chart.notes[1].render_as_od);

    // Hitting the rest of the phrase can no longer earn it.
    release(&mut s, 3, 3.2);
    press(&mut s, 1, 3.5);
    let p = s.player(0).unwrap();
    assert!(p.chart.notes[1].hit);
    assert_eq!(p.stats.overdrive_fill, 0.0);
}

#[test]
fn overhit_outside_phrase_keeps_combo() {
    let mut s = session(five_lane(vec![tap(0, 1.0), tap(1, 2.0)]));
    press(&mut s, 0, 1.0);
    release(&mut s, 0, 1.1);

    assert_eq!(press(&mut s, 0, 1.2), JudgeOutcome::Overhit { lane: 0 });
    let p = s.player(0).unwrap();
    assert_eq!((p.stats.strikes, p.stats.combo), (1, 1));
    assert_eq!(p.stats.notes_missed, 0);
    assert!(!p.stats.fc);

    release(&mut s, 0, 1.3);
    press(&mut s, 1, 2.0);
    let p = s.player(0).unwrap();
    assert_eq!((p.stats.combo, p.stats.max_combo), (2, 2));
}

#[test]
fn reset_replays_identically() {
    let mut hold = tap(1, 2.0);
    hold.len = 1.0;
    let mut data = five_lane(vec![tap(0, 1.0), hold, tap(3, 3.5)]);
    data.od_phrases = vec![TimeRange { start: 0.5, end: 2.5 }];
    let mut s = session(data);

    let play = |s: &mut Session| {
        press(s, 0, 1.01);
        release(s, 0, 1.2);
        press(s, 1, 1.98);
        release(s, 1, 2.6);
        press(s, 4, 3.0);
        s.advance(5.0);
        s.snapshot(0).unwrap()
    };
    let first = play(&mut s);
    s.reset();
    let fresh = s.player(0).unwrap();
    assert!(fresh.chart.notes.iter().all(|n| !n.accounted));
    assert_eq!(fresh.stats.score, 0);
    let second = play(&mut s);
    assert_eq!(first, second);
    assert_eq!(first.strikes, 1);
    assert_eq!(first.notes_missed, 1);
}

proptest! {
    #[test]
    fn accounted_never_reverts(
        presses in prop::collection::vec((0usize..5, 0.0f64..6.0), 0..24),
    ) {
        let notes = (0..10u8).map(|i| tap(i % 5, 0.5 + f64::from(i) * 0.5)).collect();
        let mut s = session(five_lane(notes));
        let mut presses = presses;
        presses.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut seen = vec![false; 10];
        for (lane, t) in presses {
            press(&mut s, lane, t);
            release(&mut s, lane, t + 0.01);
            let p = s.player(0).unwrap();
            for (was, note) in seen.iter_mut().zip(&p.chart.notes) {
                prop_assert!(!*was || note.accounted);
                prop_assert!(!(note.hit && note.miss));
                *was = note.accounted;
            }
        }
        s.advance(7.0);
        prop_assert!(s.player(0).unwrap().chart.notes.iter().all(|n| n.accounted));
    }
}
