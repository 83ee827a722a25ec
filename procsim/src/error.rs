use crate::{BufferId, ProcessId, Signal, Time};

/// Result type returned by the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine. Any of them aborts the current run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A buffer request larger than the buffer capacity was rejected.
    #[error("request of {amount} exceeds capacity {capacity} of buffer {buffer}")]
    OversizedRequest {
        /// Target buffer.
        buffer: BufferId,
        /// Requested quantity.
        amount: f64,
        /// Capacity of the buffer.
        capacity: f64,
    },
    /// Negative or non-finite quantity requested.
    #[error("invalid amount {amount} requested from buffer {buffer}")]
    InvalidAmount {
        /// Target buffer.
        buffer: BufferId,
        /// Requested quantity.
        amount: f64,
    },
    /// Negative or non-finite buffer capacity.
    #[error("invalid buffer capacity: {0}")]
    InvalidCapacity(f64),
    /// Initial level outside of `[0, capacity]`.
    #[error("invalid initial buffer level: {0}")]
    InvalidLevel(f64),
    /// Negative or non-finite timeout.
    #[error("invalid delay {delay} requested by process {process}")]
    InvalidDelay {
        /// Requesting process.
        process: ProcessId,
        /// Requested delay.
        delay: Time,
    },
    /// Interrupts can only be delivered to processes that have not finished.
    #[error("cannot interrupt finished process {0}")]
    InterruptFinished(ProcessId),
    /// No such process registered.
    #[error("unknown process: {0}")]
    UnknownProcess(ProcessId),
    /// No such buffer registered.
    #[error("unknown buffer: {0}")]
    UnknownBuffer(BufferId),
    /// Run horizon lies in the past or is not a number.
    #[error("invalid horizon {until} at time {now}")]
    InvalidHorizon {
        /// Requested horizon.
        until: Time,
        /// Current simulation time.
        now: Time,
    },
    /// A process received a signal it cannot handle in its current phase.
    #[error("process {process} received unexpected signal {signal:?}")]
    UnexpectedSignal {
        /// Receiving process.
        process: ProcessId,
        /// Delivered signal.
        signal: Signal,
    },
}
