//! Production line simulation.
//!
//! A line is a chain of stages. Each stage is a pool of identical machines taking batches from
//! the buffer in front of the stage and putting their output into the buffer behind it. Raw
//! material is delivered into the first buffer by an [`ArrivalSource`]. Machines have stochastic
//! cycle times and yields, fail whole batches with some probability, and break down and get
//! repaired.
//!
//! # Examples
//!
//! ```
//! # use linesim::{run_simulation, ArrivalSpec, LineConfig, StageSpec};
//! # fn main() -> linesim::Result<()> {
//! let mut config = LineConfig::new(vec![StageSpec {
//!     name: String::from("assembly"),
//!     cycle_time: 1.0,
//!     cycle_time_sigma: Some(0.0),
//!     batch_size: 1.0,
//!     ..StageSpec::default()
//! }]);
//! config.arrivals = ArrivalSpec { interval: 1.0, size: 1.0, ..ArrivalSpec::default() };
//! config.seed = Some(7);
//! let report = run_simulation(&config, 10.0, &[1])?;
//! assert_eq!(report.finished(), 9.0);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use derive_more::{Display, From, Into};
use procsim::Time;
use serde::{Deserialize, Serialize};

mod arrival;
pub use arrival::{ArrivalSource, ArrivalStats};

mod config;
pub use config::{
    ArrivalSpec, BreakdownPolicy, LineConfig, MachineParams, RepairModel, ShiftCalendar,
    StageSpec,
};

mod error;
pub use error::{ConfigError, Error, Result};

mod line;
pub use line::{Line, LineBuilder};

mod machine;
pub use machine::{Machine, MachineEvent, MachineState, MachineStats, TimedMachineEvent};

mod recorder;
pub use recorder::{LevelRecord, MemoryRecorder, Recorder, SharedRecorder, TransitionRecord};

mod report;
pub use report::{BufferReport, MachineReport, RunReport, StageReport};

mod sampler;
pub use sampler::Sampler;

/// Machine ID, unique within a line.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct MachineId(usize);

/// Stage ID: position of the stage in the line.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct StageId(usize);

/// Builds a line from `config` with `machine_counts[i]` machines in stage `i`, runs it up to
/// `horizon` hours, and returns the report.
///
/// # Errors
///
/// Returns [`Error::Config`] if the configuration is invalid for the given machine counts, and
/// [`Error::Engine`] if the run fails.
pub fn run_simulation(
    config: &LineConfig,
    horizon: Time,
    machine_counts: &[usize],
) -> Result<RunReport> {
    let mut line = LineBuilder::new(config.clone())
        .machine_counts(machine_counts)
        .build()?;
    line.run(horizon)?;
    Ok(line.report())
}
