use std::path::PathBuf;

use clap::Parser;

use fretline::config::{self, CONFIG_PATH};
use fretline::game::gameplay::{MAX_PLAYERS, PlayerSetup, Session};
use fretline::game::replay::{self, InputScript};
use fretline::game::scoring::Instrument;

#[derive(Parser)]
#[command(name = "fretline")]
#[command(about = "Replay recorded fret input against a chart and print the stage summary", version)]
struct Args {
    /// Chart file (JSON)
    #[arg(value_name = "CHART")]
    chart: PathBuf,

    /// Recorded input script (JSON); without one, only bots score
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Config file, created with defaults when missing
    #[arg(short, long, value_name = "FILE", default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Number of seated players, all reading the same chart
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=MAX_PLAYERS as i64))]
    players: u8,

    /// Instrument for every player
    #[arg(short, long, default_value = "guitar")]
    instrument: Instrument,

    /// Let the bot play every seat
    #[arg(long)]
    bot: bool,

    /// Per-player input offset in milliseconds, overriding the config
    #[arg(long, value_name = "MS", allow_hyphen_values = true)]
    input_offset_ms: Option<f64>,

    /// Simulation frame length in seconds
    #[arg(long, default_value_t = 1.0 / 60.0)]
    frame_step: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    let cfg = config::load(&args.config);
    log::set_max_level(cfg.log_level.as_level_filter());

    let chart = replay::load_chart(&args.chart)?;
    let script = match &args.script {
        Some(path) => InputScript::load(path)?,
        None => InputScript::default(),
    };

    let setups = (0..args.players)
        .map(|_| PlayerSetup {
            chart: chart.clone(),
            instrument: args.instrument,
            bot: args.bot,
            input_offset: args.input_offset_ms.map(|ms| ms / 1000.0),
        })
        .collect();
    let mut session = Session::from_config(setups, &cfg);
    let summary = replay::run_replay(&mut session, &script, args.frame_step)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
