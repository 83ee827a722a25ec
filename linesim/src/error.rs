/// Result type returned by the line simulation.
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid line configuration, detected before the run starts.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The line has no stages.
    #[error("production line must have at least one stage")]
    EmptyLine,
    /// Number of machine counts does not match the number of stages.
    #[error("expected {expected} machine counts but got {actual}")]
    MachineCountMismatch {
        /// Number of stages.
        expected: usize,
        /// Number of counts given.
        actual: usize,
    },
    /// A stage needs at least one machine.
    #[error("stage `{0}` has no machines")]
    NoMachines(String),
    /// Batch size must be positive.
    #[error("batch size of stage `{stage}` must be positive, got {batch_size}")]
    NonPositiveBatch {
        /// Stage name.
        stage: String,
        /// Configured batch size.
        batch_size: f64,
    },
    /// A batch would never fit in the input buffer of the stage.
    #[error("batch size {batch_size} of stage `{stage}` exceeds input capacity {capacity}")]
    BatchExceedsCapacity {
        /// Stage name.
        stage: String,
        /// Configured batch size.
        batch_size: f64,
        /// Input buffer capacity.
        capacity: f64,
    },
    /// Expected output of a batch would never fit in the output buffer of the stage.
    #[error("expected output {output} of stage `{stage}` exceeds output capacity {capacity}")]
    OutputExceedsCapacity {
        /// Stage name.
        stage: String,
        /// Expected output per batch.
        output: f64,
        /// Output buffer capacity.
        capacity: f64,
    },
    /// Expected delivery would never fit in the first buffer.
    #[error("expected delivery {size} exceeds input capacity {capacity}")]
    DeliveryExceedsCapacity {
        /// Expected delivery size.
        size: f64,
        /// First buffer capacity.
        capacity: f64,
    },
    /// A parameter that must be non-negative is negative or not a number.
    #[error("parameter `{name}` of `{owner}` must be non-negative, got {value}")]
    Negative {
        /// Owner of the parameter, a stage name or a section of the configuration.
        owner: String,
        /// Parameter name.
        name: &'static str,
        /// Configured value.
        value: f64,
    },
    /// A parameter that must be positive is not.
    #[error("parameter `{name}` of `{owner}` must be positive, got {value}")]
    NonPositive {
        /// Owner of the parameter, a stage name or a section of the configuration.
        owner: String,
        /// Parameter name.
        name: &'static str,
        /// Configured value.
        value: f64,
    },
    /// Probability outside of `[0, 1]`.
    #[error("parameter `{name}` of `{owner}` must be a probability, got {value}")]
    InvalidProbability {
        /// Owner of the parameter.
        owner: String,
        /// Parameter name.
        name: &'static str,
        /// Configured value.
        value: f64,
    },
    /// Working hours per day outside of `(0, 24]`.
    #[error("working hours per day must be in (0, 24], got {0}")]
    InvalidCalendar(f64),
    /// Invalid buffer definition.
    #[error("invalid buffer `{name}`: {reason}")]
    InvalidBuffer {
        /// Buffer name.
        name: String,
        /// Reason.
        reason: String,
    },
    /// Distribution could not be constructed from the parameters.
    #[error("invalid distribution `{name}` of `{owner}`: {reason}")]
    InvalidDistribution {
        /// Owner of the distribution.
        owner: String,
        /// Distribution name.
        name: &'static str,
        /// Reason reported by the distribution.
        reason: String,
    },
    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors of the line simulation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The line could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The engine failed during the run.
    #[error(transparent)]
    Engine(#[from] procsim::Error),
    /// No such machine.
    #[error("unknown machine: {0}")]
    UnknownMachine(crate::MachineId),
}
