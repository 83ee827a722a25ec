//! Anything related to setting up a production line from configuration.

use std::io::Read;

use procsim::{BufferOptions, OversizePolicy, Time, EPSILON};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How a machine decides when to break down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::ToString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BreakdownPolicy {
    /// Exponential time-to-failure timer, re-drawn at each breakdown and counted down once the
    /// repair is over, regardless of whether the machine is working.
    Timer,
    /// Breakdown once the cumulative processing time crosses an exponentially drawn threshold.
    OperatingHours,
}

impl Default for BreakdownPolicy {
    fn default() -> Self {
        Self::Timer
    }
}

/// How repair durations are drawn from the mean time to repair `m` and the repair sigma `s`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::ToString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RepairModel {
    /// Log-normal with arithmetic mean `m` and standard deviation `s`.
    LogNormal,
    /// Logarithm of a draw from a log-normal with parameters `(m, s)`, which is a normal
    /// `N(m, s)` clamped at zero.
    LogOfLogNormal,
    /// Log-normal with parameters `(m, s)` of the underlying normal.
    RawLogNormal,
}

impl Default for RepairModel {
    fn default() -> Self {
        Self::LogNormal
    }
}

/// Converts day-based parameters to simulation hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftCalendar {
    /// Working hours in one day.
    pub work_hours_per_day: f64,
}

impl Default for ShiftCalendar {
    fn default() -> Self {
        // Two eight-hour shifts.
        Self {
            work_hours_per_day: 16.0,
        }
    }
}

impl ShiftCalendar {
    /// Converts working days to hours.
    #[must_use]
    pub fn hours(&self, days: f64) -> Time {
        days * self.work_hours_per_day
    }
}

/// Deliveries of raw material into the first buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrivalSpec {
    /// Mean time between deliveries, in hours.
    pub interval: Time,
    /// Standard deviation of the time between deliveries.
    pub interval_sigma: f64,
    /// Mean delivery size.
    pub size: f64,
    /// Standard deviation of the delivery size.
    pub size_sigma: f64,
}

impl Default for ArrivalSpec {
    fn default() -> Self {
        Self {
            interval: 1.0,
            interval_sigma: 0.0,
            size: 10_000.0,
            size_sigma: 0.0,
        }
    }
}

fn default_machines() -> usize {
    1
}

fn default_yield_rate() -> f64 {
    1.0
}

fn default_repair_sigma() -> f64 {
    0.5
}

/// Parameters of one production stage: a pool of identical machines reading from the previous
/// buffer and writing to its own output buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name.
    pub name: String,
    /// Default number of machines, used unless counts are given explicitly.
    #[serde(default = "default_machines")]
    pub machines: usize,
    /// Mean cycle time in hours.
    pub cycle_time: Time,
    /// Cycle time standard deviation. Defaults to a tenth of the cycle time.
    #[serde(default)]
    pub cycle_time_sigma: Option<f64>,
    /// Expected fraction of a batch converted into output.
    #[serde(default = "default_yield_rate")]
    pub yield_rate: f64,
    /// Standard deviation of the output quantity.
    #[serde(default)]
    pub yield_sigma: f64,
    /// Probability that a whole batch fails and is scrapped.
    #[serde(default)]
    pub batch_failure_rate: f64,
    /// Mean time between failures, in working days. No breakdowns if missing.
    #[serde(default)]
    pub mtbf_days: Option<f64>,
    /// Mean time to repair, in working days.
    #[serde(default)]
    pub mttr_days: f64,
    /// Standard deviation of the repair time, in hours.
    #[serde(default = "default_repair_sigma")]
    pub repair_sigma: f64,
    /// Quantity taken from the input buffer per cycle.
    pub batch_size: f64,
    /// Buffer receiving the output of this stage.
    #[serde(default)]
    pub output_buffer: BufferOptions,
}

impl Default for StageSpec {
    fn default() -> Self {
        Self {
            name: String::from("stage"),
            machines: default_machines(),
            cycle_time: 1.0,
            cycle_time_sigma: None,
            yield_rate: default_yield_rate(),
            yield_sigma: 0.0,
            batch_failure_rate: 0.0,
            mtbf_days: None,
            mttr_days: 0.0,
            repair_sigma: default_repair_sigma(),
            batch_size: 1.0,
            output_buffer: BufferOptions::unbounded(),
        }
    }
}

/// Machine parameters in simulation units, shared by all machines of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineParams {
    /// Quantity taken from the input buffer per cycle.
    pub batch_size: f64,
    /// Mean cycle time.
    pub cycle_time: Time,
    /// Cycle time standard deviation.
    pub cycle_time_sigma: f64,
    /// Expected fraction of a batch converted into output.
    pub yield_rate: f64,
    /// Standard deviation of the output quantity.
    pub yield_sigma: f64,
    /// Probability that a whole batch is scrapped.
    pub batch_failure_rate: f64,
    /// Mean time between failures in hours, or `None` if the machine never breaks down.
    pub mtbf: Option<Time>,
    /// Mean time to repair in hours.
    pub mttr: Time,
    /// Standard deviation of the repair time in hours.
    pub repair_sigma: f64,
    /// Breakdown trigger.
    pub breakdown_policy: BreakdownPolicy,
    /// Repair duration model.
    pub repair_model: RepairModel,
}

/// Production line configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Seed of the random number generator. Seeded from entropy if missing.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Conversion of day-based parameters.
    #[serde(default)]
    pub shifts: ShiftCalendar,
    /// Deliveries into the first buffer.
    #[serde(default)]
    pub arrivals: ArrivalSpec,
    /// First buffer, feeding the first stage. Unbounded by default.
    #[serde(default)]
    pub input_buffer: BufferOptions,
    /// Stages in the order material flows through them.
    pub stages: Vec<StageSpec>,
    /// Breakdown trigger used by all machines.
    #[serde(default)]
    pub breakdown_policy: BreakdownPolicy,
    /// Repair duration model used by all machines.
    #[serde(default)]
    pub repair_model: RepairModel,
}

impl LineConfig {
    /// Constructs a configuration with default arrivals and buffers for the given stages.
    #[must_use]
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self {
            seed: None,
            shifts: ShiftCalendar::default(),
            arrivals: ArrivalSpec::default(),
            input_buffer: BufferOptions::unbounded(),
            stages,
            breakdown_policy: BreakdownPolicy::default(),
            repair_model: RepairModel::default(),
        }
    }

    /// Loads and validates the configuration from a YAML reader.
    ///
    /// # Examples
    ///
    /// ```
    /// # use linesim::{BreakdownPolicy, LineConfig};
    /// # fn main() -> Result<(), linesim::ConfigError> {
    /// let input = r#"
    /// seed: 42
    /// arrivals:
    ///   interval: 2.0
    ///   size: 500
    /// breakdown_policy: operating_hours
    /// stages:
    ///   - name: mixing
    ///     machines: 2
    ///     cycle_time: 1.5
    ///     batch_size: 100
    ///     mtbf_days: 10
    ///     mttr_days: 0.5
    ///     output_buffer:
    ///       capacity: 1000
    ///   - name: packing
    ///     cycle_time: 0.5
    ///     yield_rate: 0.9
    ///     batch_size: 50
    /// "#;
    /// let config = LineConfig::from_yaml(std::io::Cursor::new(input))?;
    /// assert_eq!(config.seed, Some(42));
    /// assert_eq!(config.arrivals.size, 500.0);
    /// assert_eq!(config.arrivals.interval_sigma, 0.0);
    /// assert_eq!(config.breakdown_policy, BreakdownPolicy::OperatingHours);
    /// assert_eq!(config.stages.len(), 2);
    /// assert_eq!(config.stages[1].machines, 1);
    /// assert_eq!(config.machine_params(0).mtbf, Some(160.0));
    /// assert_eq!(config.machine_params(0).mttr, 8.0);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Error will be returned either if the input cannot be parsed, or if the configuration
    /// is invalid, see [`LineConfig::validate`].
    pub fn from_yaml<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_reader(reader).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Machine counts configured in the stages.
    #[must_use]
    pub fn machine_counts(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.machines).collect()
    }

    /// Returns the parameters of the machines of stage `stage`, converted to hours.
    ///
    /// # Panics
    ///
    /// Panics if `stage` is out of bounds.
    #[must_use]
    pub fn machine_params(&self, stage: usize) -> MachineParams {
        let spec = &self.stages[stage];
        MachineParams {
            batch_size: spec.batch_size,
            cycle_time: spec.cycle_time,
            cycle_time_sigma: spec
                .cycle_time_sigma
                .unwrap_or(spec.cycle_time / 10.0),
            yield_rate: spec.yield_rate,
            yield_sigma: spec.yield_sigma,
            batch_failure_rate: spec.batch_failure_rate,
            mtbf: spec.mtbf_days.map(|days| self.shifts.hours(days)),
            mttr: self.shifts.hours(spec.mttr_days),
            repair_sigma: spec.repair_sigma,
            breakdown_policy: self.breakdown_policy,
            repair_model: self.repair_model,
        }
    }

    /// Options of the buffer feeding stage `stage`.
    fn input_of(&self, stage: usize) -> &BufferOptions {
        if stage == 0 {
            &self.input_buffer
        } else {
            &self.stages[stage - 1].output_buffer
        }
    }

    /// Checks the configuration with the machine counts configured in the stages.
    ///
    /// # Errors
    ///
    /// Returns the first problem found. See [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with_counts(&self.machine_counts())
    }

    /// Checks the configuration with explicit machine counts, one per stage.
    ///
    /// # Errors
    ///
    /// Returns the first problem found. See [`ConfigError`].
    pub fn validate_with_counts(&self, counts: &[usize]) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyLine);
        }
        if counts.len() != self.stages.len() {
            return Err(ConfigError::MachineCountMismatch {
                expected: self.stages.len(),
                actual: counts.len(),
            });
        }
        let hours = self.shifts.work_hours_per_day;
        if !(hours > 0.0 && hours <= 24.0) {
            return Err(ConfigError::InvalidCalendar(hours));
        }
        self.validate_arrivals()?;
        check_buffer("input", &self.input_buffer)?;
        for (idx, (spec, &count)) in self.stages.iter().zip(counts).enumerate() {
            if count == 0 {
                return Err(ConfigError::NoMachines(spec.name.clone()));
            }
            check_buffer(&spec.name, &spec.output_buffer)?;
            validate_stage(spec)?;
            if let Some(capacity) = self.input_of(idx).capacity {
                if spec.batch_size > capacity + EPSILON {
                    return Err(ConfigError::BatchExceedsCapacity {
                        stage: spec.name.clone(),
                        batch_size: spec.batch_size,
                        capacity,
                    });
                }
            }
            let output = spec.batch_size * spec.yield_rate;
            if let Some(capacity) = spec.output_buffer.capacity {
                if spec.output_buffer.oversize == OversizePolicy::Reject
                    && output > capacity + EPSILON
                {
                    return Err(ConfigError::OutputExceedsCapacity {
                        stage: spec.name.clone(),
                        output,
                        capacity,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_arrivals(&self) -> Result<(), ConfigError> {
        let arrivals = &self.arrivals;
        positive("arrivals", "interval", arrivals.interval)?;
        non_negative("arrivals", "interval_sigma", arrivals.interval_sigma)?;
        non_negative("arrivals", "size", arrivals.size)?;
        non_negative("arrivals", "size_sigma", arrivals.size_sigma)?;
        if let Some(capacity) = self.input_buffer.capacity {
            if self.input_buffer.oversize == OversizePolicy::Reject
                && arrivals.size > capacity + EPSILON
            {
                return Err(ConfigError::DeliveryExceedsCapacity {
                    size: arrivals.size,
                    capacity,
                });
            }
        }
        Ok(())
    }
}

fn validate_stage(spec: &StageSpec) -> Result<(), ConfigError> {
    let owner = spec.name.as_str();
    if !(spec.batch_size > 0.0 && spec.batch_size.is_finite()) {
        return Err(ConfigError::NonPositiveBatch {
            stage: spec.name.clone(),
            batch_size: spec.batch_size,
        });
    }
    non_negative(owner, "cycle_time", spec.cycle_time)?;
    if let Some(sigma) = spec.cycle_time_sigma {
        non_negative(owner, "cycle_time_sigma", sigma)?;
    }
    non_negative(owner, "yield_rate", spec.yield_rate)?;
    non_negative(owner, "yield_sigma", spec.yield_sigma)?;
    probability(owner, "batch_failure_rate", spec.batch_failure_rate)?;
    if let Some(mtbf) = spec.mtbf_days {
        positive(owner, "mtbf_days", mtbf)?;
    }
    non_negative(owner, "mttr_days", spec.mttr_days)?;
    non_negative(owner, "repair_sigma", spec.repair_sigma)?;
    Ok(())
}

fn check_buffer(owner: &str, options: &BufferOptions) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBuffer {
        name: if options.name.is_empty() {
            owner.to_string()
        } else {
            options.name.clone()
        },
        reason,
    };
    if let Some(capacity) = options.capacity {
        if !(capacity >= 0.0 && capacity.is_finite()) {
            return Err(invalid(format!("capacity {} is invalid", capacity)));
        }
        if options.initial_level > capacity + EPSILON {
            return Err(invalid(format!(
                "initial level {} exceeds capacity {}",
                options.initial_level, capacity
            )));
        }
    }
    if !(options.initial_level >= 0.0 && options.initial_level.is_finite()) {
        return Err(invalid(format!(
            "initial level {} is invalid",
            options.initial_level
        )));
    }
    Ok(())
}

fn non_negative(owner: &str, name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Negative {
            owner: owner.to_string(),
            name,
            value,
        })
    }
}

fn positive(owner: &str, name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            owner: owner.to_string(),
            name,
            value,
        })
    }
}

fn probability(owner: &str, name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability {
            owner: owner.to_string(),
            name,
            value,
        })
    }
}
