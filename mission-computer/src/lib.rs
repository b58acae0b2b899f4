//! Mission computer telemetry.
//!
//! Samples three kinds of telemetry at fixed cadences and writes them to
//! stdout through the mission scheduler:
//!
//! | Category      | Source                | Default cadence |
//! |---------------|-----------------------|-----------------|
//! | `info`        | OS, CPU, total memory | 20 s            |
//! | `load`        | CPU and memory usage  | 20 s            |
//! | `environment` | simulated habitat     | 5 s             |
//!
//! The tasks run either as threads of one process (`Threaded-Computer`) or
//! as one worker process per task (`Process-1`, `Process-2`, ...).

pub mod config;
pub mod sources;
