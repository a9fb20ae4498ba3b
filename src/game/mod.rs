pub mod band;
pub mod chart;
pub mod gameplay;
pub mod judgment;
pub mod note;
pub mod replay;
pub mod scoring;
pub mod stage_stats;
pub mod timing_windows;
