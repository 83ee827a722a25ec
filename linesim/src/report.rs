use procsim::{BufferId, LevelSample, Time};
use serde::Serialize;

use crate::{
    ArrivalStats, MachineId, MachineState, MachineStats, StageId, TimedMachineEvent,
};

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Stage ID.
    pub id: StageId,
    /// Stage name.
    pub name: String,
    /// Number of machines.
    pub machines: usize,
    /// Total output placed in the output buffer of the stage.
    pub finished: f64,
    /// Total number of breakdowns of the machines of the stage.
    pub breakdowns: usize,
}

/// Final state and level history of a buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferReport {
    /// Buffer ID.
    pub id: BufferId,
    /// Buffer name.
    pub name: String,
    /// Capacity, `None` if unbounded.
    pub capacity: Option<f64>,
    /// Level at the end of the run.
    pub level: f64,
    /// Level history, starting with the initial level.
    pub history: Vec<LevelSample>,
}

impl BufferReport {
    /// Level at creation time.
    #[must_use]
    pub fn initial_level(&self) -> f64 {
        self.history.first().map_or(0.0, |sample| sample.level)
    }
}

/// Final state, counters, and event log of a machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineReport {
    /// Machine ID.
    pub id: MachineId,
    /// Stage the machine belongs to.
    pub stage: StageId,
    /// State at the end of the run.
    pub state: MachineState,
    /// Counters.
    pub stats: MachineStats,
    /// Events in chronological order.
    pub events: Vec<TimedMachineEvent>,
}

/// Result of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Time at which the run stopped.
    pub horizon: Time,
    /// Raw material delivered into the line.
    pub arrivals: ArrivalStats,
    /// Per-stage results, in line order.
    pub stages: Vec<StageReport>,
    /// Per-buffer results, in line order: the input buffer first, the sink last.
    pub buffers: Vec<BufferReport>,
    /// Per-machine results.
    pub machines: Vec<MachineReport>,
}

impl RunReport {
    /// Output of the last stage.
    #[must_use]
    pub fn finished(&self) -> f64 {
        self.stages.last().map_or(0.0, |stage| stage.finished)
    }

    /// Total quantity stored in buffers.
    #[must_use]
    pub fn stored(&self) -> f64 {
        self.buffers.iter().map(|b| b.level).sum()
    }

    /// Total quantity held or lost by machines: in flight, scrapped, discarded, and yield loss.
    #[must_use]
    pub fn held_by_machines(&self) -> f64 {
        self.machines
            .iter()
            .map(|m| m.stats.in_flight + m.stats.scrapped + m.stats.discarded + m.stats.yield_loss)
            .sum()
    }

    /// Material that entered the line but is not accounted for by buffers and machines.
    /// Zero up to rounding errors.
    #[must_use]
    pub fn conservation_gap(&self) -> f64 {
        let initial: f64 = self.buffers.iter().map(BufferReport::initial_level).sum();
        self.arrivals.arrived + initial - self.stored() - self.held_by_machines()
    }
}
