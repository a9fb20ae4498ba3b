use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::chart::{Chart, ChartData, ChartError};
use crate::game::gameplay::{Binding, InputAction, InputEdge, InputTarget, Session};
use crate::game::stage_stats::StageSummary;

/// Time simulated after the last judgable moment when a script has no end.
const TAIL_S: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("frame step must be finite and positive (got {0})")]
    FrameStep(f64),

    #[error("event {index} targets player {player}, but only {players} are seated")]
    UnknownPlayer {
        index: usize,
        player: usize,
        players: usize,
    },

    #[error("event {index} at {time}s comes before the previous event")]
    Unordered { index: usize, time: f64 },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct InputRecord {
    pub time: f64,
    #[serde(default)]
    pub player: usize,
    pub target: InputTarget,
    pub action: InputAction,
    #[serde(default)]
    pub binding: Binding,
}

impl InputRecord {
    pub fn edge(&self) -> InputEdge {
        InputEdge {
            target: self.target,
            action: self.action,
            binding: self.binding,
        }
    }
}

/// Recorded input for a headless run, ordered by time.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct InputScript {
    #[serde(default)]
    pub events: Vec<InputRecord>,
    #[serde(default)]
    pub end_time: Option<f64>,
}

impl InputScript {
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        read_json(path)
    }

    fn validate(&self, players: usize) -> Result<(), ReplayError> {
        let mut prev = f64::NEG_INFINITY;
        for (index, ev) in self.events.iter().enumerate() {
            if ev.player >= players {
                return Err(ReplayError::UnknownPlayer {
                    index,
                    player: ev.player,
                    players,
                });
            }
            if !ev.time.is_finite() || ev.time < prev {
                return Err(ReplayError::Unordered {
                    index,
                    time: ev.time,
                });
            }
            prev = ev.time;
        }
        Ok(())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ReplayError> {
    let text = fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ReplayError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_chart(path: &Path) -> Result<Chart, ReplayError> {
    let data: ChartData = read_json(path)?;
    let chart = Chart::from_data(data)?;
    info!("Loaded chart '{}' ({} notes)", path.display(), chart.notes.len());
    Ok(chart)
}

/// Resets `session` and drives it with `script`, advancing in fixed frames of
/// `frame_step` seconds. Events land at their own timestamps between frames.
pub fn run_replay(
    session: &mut Session,
    script: &InputScript,
    frame_step: f64,
) -> Result<StageSummary, ReplayError> {
    if !frame_step.is_finite() || frame_step <= 0.0 {
        return Err(ReplayError::FrameStep(frame_step));
    }
    script.validate(session.player_count())?;
    session.reset();

    let last_event = script.events.last().map_or(0.0, |ev| ev.time);
    let end = script
        .end_time
        .unwrap_or_else(|| last_event.max(session.last_judgable_time()) + TAIL_S);
    let start = script.events.first().map_or(0.0, |ev| ev.time.min(0.0));

    let mut events = script.events.iter().peekable();
    let mut frame = 0u64;
    loop {
        let t = (start + frame as f64 * frame_step).min(end);
        while let Some(ev) = events.next_if(|ev| ev.time <= t) {
            let outcome = session.handle_input(ev.player, ev.edge(), ev.time);
            debug!("replay {:.4}s {:?} -> {outcome:?}", ev.time, ev.target);
        }
        session.advance(t);
        if t >= end {
            break;
        }
        frame += 1;
    }
    info!(
        "Replay finished at {end:.3}s after {} frame(s) of {:.4}s",
        frame + 1,
        frame_step
    );
    Ok(session.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::gameplay::{PlayOptions, PlayerSetup};
    use crate::game::note::NoteData;
    use crate::game::scoring::Instrument;
    use crate::game::stage_stats::DEFAULT_STAR_THRESHOLDS;
    use crate::game::timing_windows::TimingPolicy;
    use std::io::Write;

    fn session() -> Session {
        let chart = Chart::from_data(ChartData {
            lane_count: 5,
            notes: vec![
                NoteData {
                    lane: 0,
                    time: 1.0,
                    ..NoteData::default()
                },
                NoteData {
                    lane: 1,
                    time: 2.0,
                    len: 1.0,
                    ..NoteData::default()
                },
            ],
            ..ChartData::default()
        })
        .unwrap();
        Session::new(
            vec![PlayerSetup {
                chart,
                instrument: Instrument::Guitar,
                bot: false,
                input_offset: None,
            }],
            TimingPolicy::default(),
            PlayOptions::default(),
            DEFAULT_STAR_THRESHOLDS,
        )
    }

    const SCRIPT: &str = r#"{
        "events": [
            { "time": 1.01, "target": { "lane": 0 }, "action": "press" },
            { "time": 1.2, "target": { "lane": 0 }, "action": "release" },
            { "time": 2.0, "target": { "lane": 1 }, "action": "press" },
            { "time": 2.5, "target": { "lane": 1 }, "action": "release", "binding": "primary" },
            { "time": 2.6, "target": "overdrive", "action": "press", "binding": "alternate" }
        ]
    }"#;

    #[test]
    fn script_parses_targets_and_bindings() {
        let script: InputScript = serde_json::from_str(SCRIPT).unwrap();
        assert_eq!(script.events.len(), 5);
        assert_eq!(script.events[0].target, InputTarget::Lane(0));
        assert_eq!(script.events[4].target, InputTarget::Overdrive);
        assert_eq!(script.events[4].binding, Binding::Alternate);
    }

    #[test]
    fn replay_is_identical_across_frame_steps() {
        let script: InputScript = serde_json::from_str(SCRIPT).unwrap();
        let mut s = session();
        let slow = run_replay(&mut s, &script, 1.0 / 30.0).unwrap();
        let fast = run_replay(&mut s, &script, 1.0 / 240.0).unwrap();
        assert_eq!(slow.players[0].score, fast.players[0].score);
        assert_eq!(slow.players[0].max_combo, 2);
        assert_eq!(fast.players[0].notes_hit, 2);
        // Half of a two-beat sustain on top of two taps.
        assert_eq!(fast.players[0].score, 30 + 30 + 12);
    }

    #[test]
    fn rejects_bad_scripts() {
        let mut s = session();
        let mut script: InputScript = serde_json::from_str(SCRIPT).unwrap();
        assert!(matches!(run_replay(&mut s, &script, 0.0), Err(ReplayError::FrameStep(_))));
        script.events[1].time = 0.5;
        assert!(matches!(
            run_replay(&mut s, &script, 0.01),
            Err(ReplayError::Unordered { index: 1, .. })
        ));
        script.events[1].time = 1.2;
        script.events[2].player = 3;
        assert!(matches!(
            run_replay(&mut s, &script, 0.01),
            Err(ReplayError::UnknownPlayer { player: 3, .. })
        ));
    }

    #[test]
    fn loads_chart_and_script_from_disk() {
        let mut chart_file = tempfile::NamedTempFile::new().unwrap();
        write!(
            chart_file,
            r#"{{ "lane_count": 4, "notes": [{{ "lane": 3, "time": 0.5, "ptap": true }}] }}"#
        )
        .unwrap();
        let chart = load_chart(chart_file.path()).unwrap();
        assert!(chart.notes[0].p_tap);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{ "lane_count": 9 }}"#).unwrap();
        assert!(matches!(load_chart(bad.path()), Err(ReplayError::Chart(_))));

        let missing = chart_file.path().with_extension("missing");
        assert!(matches!(InputScript::load(&missing), Err(ReplayError::Io { .. })));
    }
}
