use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::simulation::Kernel;
use crate::{Buffer, BufferId, ClockRef, Result, Time};

/// Identifies a process registered in a simulation.
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
pub struct ProcessId(usize);

/// Value a process is resumed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// First resumption after the process has been added.
    Start,
    /// Requested timeout has elapsed.
    Timeout,
    /// Requested quantity has been taken out of the buffer.
    Acquired,
    /// Requested quantity has been placed in the buffer.
    Stored,
    /// Pending suspension was cancelled by an interrupt.
    Interrupted,
}

/// Suspension requested by a process when it yields control back to the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Await {
    /// Resume with [`Signal::Timeout`] after the given delay.
    Timeout(Time),
    /// Resume with [`Signal::Acquired`] once `amount` has been taken out of `buffer`.
    Get {
        /// Source buffer.
        buffer: BufferId,
        /// Quantity to take.
        amount: f64,
    },
    /// Resume with [`Signal::Stored`] once `amount` has been placed in `buffer`.
    Put {
        /// Target buffer.
        buffer: BufferId,
        /// Quantity to place.
        amount: f64,
    },
    /// The process has finished and will never be resumed again.
    Done,
}

/// What a suspended process is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wait {
    /// A timeout.
    Timeout,
    /// A `get` request on the buffer.
    Get(BufferId),
    /// A `put` request on the buffer.
    Put(BufferId),
}

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Running, or scheduled to run at the current time.
    Runnable,
    /// Waiting for a timeout or a buffer condition.
    Suspended(Wait),
    /// Interrupted, with the interrupt not yet delivered.
    Interrupted,
    /// Finished.
    Done,
}

/// A suspendable unit of execution.
///
/// A process is an explicit state machine: each call to [`Process::resume`] continues from where
/// the previous call left off and returns the next suspension point. The returned [`Await`]
/// determines which [`Signal`] the process is resumed with next, unless it gets interrupted
/// in the meantime, in which case it receives [`Signal::Interrupted`] instead.
pub trait Process {
    /// Resumes the process with `signal`.
    ///
    /// # Errors
    ///
    /// Any error returned aborts the simulation run.
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> Result<Await>;
}

impl<F> Process for F
where
    F: FnMut(&mut Context<'_>, Signal) -> Result<Await>,
{
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> Result<Await> {
        self(ctx, signal)
    }
}

/// Access to the simulation given to a process while it is being resumed.
pub struct Context<'a> {
    kernel: &'a mut Kernel,
    id: ProcessId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(kernel: &'a mut Kernel, id: ProcessId) -> Self {
        Self { kernel, id }
    }

    /// ID of the process being resumed.
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> Time {
        self.kernel.time()
    }

    /// Read-only access to the simulation clock.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        self.kernel.clock()
    }

    /// Returns the buffer with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownBuffer`] if no such buffer exists.
    pub fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        self.kernel.buffer(id)
    }

    /// Returns the current state of another process.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownProcess`] if no such process exists.
    pub fn state(&self, process: ProcessId) -> Result<ProcessState> {
        self.kernel.state(process)
    }

    /// Interrupts `target`. See [`crate::Simulation::interrupt`].
    ///
    /// # Errors
    ///
    /// Fails if `target` does not exist or has already finished.
    pub fn interrupt(&mut self, target: ProcessId) -> Result<bool> {
        self.kernel.interrupt(target)
    }
}
