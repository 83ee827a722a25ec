use std::cell::RefCell;
use std::rc::Rc;

use procsim::{BufferId, Time};
use serde::Serialize;

use crate::{MachineId, MachineState};

/// Observer of a running line. Both hooks do nothing by default.
pub trait Recorder {
    /// Called whenever the level of a buffer changes.
    fn record_level(&mut self, _time: Time, _buffer: BufferId, _level: f64) {}

    /// Called whenever a machine changes its state.
    fn record_transition(
        &mut self,
        _time: Time,
        _machine: MachineId,
        _from: MachineState,
        _to: MachineState,
    ) {
    }
}

/// Recorder shared between the line and its owner.
pub type SharedRecorder = Rc<RefCell<dyn Recorder>>;

/// Buffer level change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelRecord {
    /// Simulation time.
    pub time: Time,
    /// Buffer.
    pub buffer: BufferId,
    /// New level.
    pub level: f64,
}

/// Machine state change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionRecord {
    /// Simulation time.
    pub time: Time,
    /// Machine.
    pub machine: MachineId,
    /// Previous state.
    pub from: MachineState,
    /// New state.
    pub to: MachineState,
}

/// Keeps everything it is told in memory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryRecorder {
    /// Level changes, in the order they happened.
    pub levels: Vec<LevelRecord>,
    /// State changes, in the order they happened.
    pub transitions: Vec<TransitionRecord>,
}

impl MemoryRecorder {
    /// Constructs an empty recorder, ready to be passed to a line.
    #[must_use]
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Transitions of one machine.
    pub fn transitions_of(&self, machine: MachineId) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions
            .iter()
            .filter(move |t| t.machine == machine)
    }
}

impl Recorder for MemoryRecorder {
    fn record_level(&mut self, time: Time, buffer: BufferId, level: f64) {
        self.levels.push(LevelRecord {
            time,
            buffer,
            level,
        });
    }

    fn record_transition(
        &mut self,
        time: Time,
        machine: MachineId,
        from: MachineState,
        to: MachineState,
    ) {
        self.transitions.push(TransitionRecord {
            time,
            machine,
            from,
            to,
        });
    }
}
