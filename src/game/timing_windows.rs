// Hit windows shared by the judgment engine and the frame advancer.
// All values are in seconds.

use thiserror::Error;

pub const GOOD_BACKEND_S: f64 = 0.075;
pub const GOOD_FRONTEND_S: f64 = 0.075;
pub const PERFECT_BACKEND_S: f64 = 0.025;
pub const PERFECT_FRONTEND_S: f64 = 0.025;
pub const LIFT_TIMING_MULT: f64 = 1.25;

/// Calibration offsets beyond this are rejected.
pub const MAX_INPUT_OFFSET_S: f64 = 0.5;

/// Lane presses this soon after an overdrive press are never overhits.
pub const OVERDRIVE_GRACE_S: f64 = 0.05;
/// A press this close to a just-hit lift's note time is never an overhit.
pub const LIFT_REPRESS_GUARD_S: f64 = 0.1;

#[derive(Debug, Error, PartialEq)]
pub enum TimingError {
    #[error("window {name} must be finite and positive (got {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("perfect window ({perfect_back}, {perfect_front}) is not strictly inside good window ({good_back}, {good_front})")]
    PerfectNotInsideGood {
        perfect_back: f64,
        perfect_front: f64,
        good_back: f64,
        good_front: f64,
    },

    #[error("lift timing multiplier {0} must be at least 1")]
    LiftMultBelowOne(f64),

    #[error("input offset {0}s is outside ±{MAX_INPUT_OFFSET_S}s")]
    OffsetOutOfRange(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WindowKind {
    Press,
    LiftRelease,
}

/// A closed interval `[note - back, note + front]`, before offsets.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HitWindow {
    pub back: f64,
    pub front: f64,
}

impl HitWindow {
    #[inline(always)]
    pub fn accepts(&self, note_time: f64, event_time: f64) -> bool {
        note_time - self.back <= event_time && event_time <= note_time + self.front
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingPolicy {
    good_backend: f64,
    good_frontend: f64,
    perfect_backend: f64,
    perfect_frontend: f64,
    lift_timing_mult: f64,
    input_offset: f64,
    video_offset: f64,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            good_backend: GOOD_BACKEND_S,
            good_frontend: GOOD_FRONTEND_S,
            perfect_backend: PERFECT_BACKEND_S,
            perfect_frontend: PERFECT_FRONTEND_S,
            lift_timing_mult: LIFT_TIMING_MULT,
            input_offset: 0.0,
            video_offset: 0.0,
        }
    }
}

impl TimingPolicy {
    /// Builds a policy, rejecting any configuration where the perfect window
    /// is not strictly nested inside every good window it is tested against.
    pub fn new(
        good: HitWindow,
        perfect: HitWindow,
        lift_timing_mult: f64,
        input_offset: f64,
        video_offset: f64,
    ) -> Result<Self, TimingError> {
        for (name, value) in [
            ("good backend", good.back),
            ("good frontend", good.front),
            ("perfect backend", perfect.back),
            ("perfect frontend", perfect.front),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(TimingError::NonPositive { name, value });
            }
        }
        if perfect.back >= good.back || perfect.front >= good.front {
            return Err(TimingError::PerfectNotInsideGood {
                perfect_back: perfect.back,
                perfect_front: perfect.front,
                good_back: good.back,
                good_front: good.front,
            });
        }
        if !lift_timing_mult.is_finite() || lift_timing_mult < 1.0 {
            return Err(TimingError::LiftMultBelowOne(lift_timing_mult));
        }
        if !input_offset.is_finite() || input_offset.abs() > MAX_INPUT_OFFSET_S {
            return Err(TimingError::OffsetOutOfRange(input_offset));
        }
        Ok(Self {
            good_backend: good.back,
            good_frontend: good.front,
            perfect_backend: perfect.back,
            perfect_frontend: perfect.front,
            lift_timing_mult,
            input_offset,
            video_offset: if video_offset.is_finite() { video_offset } else { 0.0 },
        })
    }

    pub fn with_input_offset(self, input_offset: f64) -> Result<Self, TimingError> {
        Self::new(
            self.good(WindowKind::Press),
            self.perfect(),
            self.lift_timing_mult,
            input_offset,
            self.video_offset,
        )
    }

    #[inline(always)]
    pub fn good(&self, kind: WindowKind) -> HitWindow {
        match kind {
            WindowKind::Press => HitWindow {
                back: self.good_backend,
                front: self.good_frontend,
            },
            WindowKind::LiftRelease => HitWindow {
                back: self.good_backend * self.lift_timing_mult,
                front: self.good_frontend * self.lift_timing_mult,
            },
        }
    }

    #[inline(always)]
    pub fn perfect(&self) -> HitWindow {
        HitWindow {
            back: self.perfect_backend,
            front: self.perfect_frontend,
        }
    }

    #[inline(always)]
    pub fn input_offset(&self) -> f64 {
        self.input_offset
    }

    #[inline(always)]
    pub fn video_offset(&self) -> f64 {
        self.video_offset
    }

    #[inline(always)]
    pub fn lift_timing_mult(&self) -> f64 {
        self.lift_timing_mult
    }

    /// Whether an event at `event_time` may judge a note at `note_time`.
    #[inline(always)]
    pub fn in_good_window(&self, kind: WindowKind, note_time: f64, event_time: f64) -> bool {
        self.good(kind)
            .accepts(note_time + self.input_offset, event_time)
    }

    #[inline(always)]
    pub fn in_perfect_window(&self, note_time: f64, event_time: f64) -> bool {
        self.perfect()
            .accepts(note_time + self.input_offset, event_time)
    }

    /// Latest event time that can still judge the note.
    #[inline(always)]
    pub fn late_edge(&self, lift: bool, note_time: f64) -> f64 {
        let kind = if lift {
            WindowKind::LiftRelease
        } else {
            WindowKind::Press
        };
        note_time + self.input_offset + self.good(kind).front
    }

    /// True once the note's acceptance window has fully closed at `now`.
    #[inline(always)]
    pub fn window_elapsed(&self, lift: bool, note_time: f64, now: f64) -> bool {
        self.late_edge(lift, note_time) < now
    }

    /// True while the note's acceptance window has not opened yet at `now`.
    #[inline(always)]
    pub fn window_not_open(&self, kind: WindowKind, note_time: f64, now: f64) -> bool {
        now < note_time + self.input_offset - self.good(kind).back
    }

    /// Maps a playback time into the renderer's time base. Never used for judgment.
    #[inline(always)]
    pub fn visual_time(&self, music_time: f64) -> f64 {
        music_time + self.video_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(good: f64, perfect: f64) -> TimingPolicy {
        TimingPolicy::new(
            HitWindow { back: good, front: good },
            HitWindow { back: perfect, front: perfect },
            LIFT_TIMING_MULT,
            0.0,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn window_bounds_are_inclusive() {
        // Binary-exact windows so the edges compare exactly.
        let p = policy(0.0625, 0.015625);
        assert!(p.in_good_window(WindowKind::Press, 10.0, 9.9375));
        assert!(p.in_good_window(WindowKind::Press, 10.0, 10.0625));
        assert!(!p.in_good_window(WindowKind::Press, 10.0, 10.0626));
        assert!(p.in_perfect_window(10.0, 10.015625));
        assert!(!p.in_perfect_window(10.0, 10.05));
    }

    #[test]
    fn lift_release_window_is_widened() {
        let p = policy(0.08, 0.02);
        assert!(!p.in_good_window(WindowKind::Press, 1.0, 1.09));
        assert!(p.in_good_window(WindowKind::LiftRelease, 1.0, 1.09));
        assert!(!p.window_elapsed(true, 1.0, 1.09));
        assert!(p.window_elapsed(false, 1.0, 1.09));
    }

    #[test]
    fn rejects_perfect_window_not_nested() {
        let err = TimingPolicy::new(
            HitWindow { back: 0.05, front: 0.05 },
            HitWindow { back: 0.05, front: 0.02 },
            1.0,
            0.0,
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, TimingError::PerfectNotInsideGood { .. }));
        assert_eq!(
            TimingPolicy::default().with_input_offset(0.9).unwrap_err(),
            TimingError::OffsetOutOfRange(0.9)
        );
        assert!(matches!(
            TimingPolicy::new(
                HitWindow { back: 0.05, front: 0.05 },
                HitWindow { back: 0.01, front: 0.01 },
                0.5,
                0.0,
                0.0
            ),
            Err(TimingError::LiftMultBelowOne(_))
        ));
    }

    #[test]
    fn video_offset_only_shifts_visual_time() {
        let p = TimingPolicy::new(
            HitWindow { back: 0.07, front: 0.07 },
            HitWindow { back: 0.02, front: 0.02 },
            1.0,
            0.0,
            0.3,
        )
        .unwrap();
        assert!((p.visual_time(1.0) - 1.3).abs() < 1e-12);
        assert!(p.in_good_window(WindowKind::Press, 1.0, 1.0));
    }

    proptest! {
        #[test]
        fn perfect_window_nested_for_any_offset(
            offset in -MAX_INPUT_OFFSET_S..=MAX_INPUT_OFFSET_S,
            note_time in 0.0f64..600.0,
            delta in -0.2f64..0.2,
        ) {
            let p = TimingPolicy::default().with_input_offset(offset).unwrap();
            let t = note_time + offset + delta;
            if p.in_perfect_window(note_time, t) {
                prop_assert!(p.in_good_window(WindowKind::Press, note_time, t));
                prop_assert!(p.in_good_window(WindowKind::LiftRelease, note_time, t));
            }
        }
    }
}
