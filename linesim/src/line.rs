use std::cell::Cell;
use std::rc::Rc;

use procsim::{Buffer, BufferId, BufferOptions, Simulation, Time};

use crate::machine::MachineSetup;
use crate::{
    ArrivalSource, ArrivalStats, BufferReport, Error, LineConfig, Machine, MachineId,
    MachineReport, Result, RunReport, Sampler, SharedRecorder, StageId, StageReport,
};

/// Builds a [`Line`] from a configuration.
///
/// # Examples
///
/// ```
/// # use linesim::{LineBuilder, LineConfig, StageSpec};
/// # fn main() -> linesim::Result<()> {
/// let config = LineConfig::new(vec![StageSpec {
///     name: String::from("press"),
///     cycle_time: 0.5,
///     batch_size: 100.0,
///     ..StageSpec::default()
/// }]);
/// let mut line = LineBuilder::new(config).machine_counts(&[2]).seed(1).build()?;
/// line.run(8.0)?;
/// assert!(line.report().finished() > 0.0);
/// # Ok(())
/// # }
/// ```
pub struct LineBuilder {
    config: LineConfig,
    counts: Option<Vec<usize>>,
    recorder: Option<SharedRecorder>,
    seed: Option<u64>,
    trace: bool,
}

impl LineBuilder {
    /// Starts building a line from `config`.
    #[must_use]
    pub fn new(config: LineConfig) -> Self {
        Self {
            config,
            counts: None,
            recorder: None,
            seed: None,
            trace: false,
        }
    }

    /// Overrides the number of machines of each stage.
    #[must_use]
    pub fn machine_counts(mut self, counts: &[usize]) -> Self {
        self.counts = Some(counts.to_vec());
        self
    }

    /// Attaches a recorder observing buffer levels and machine transitions.
    #[must_use]
    pub fn recorder(mut self, recorder: SharedRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Overrides the seed of the configuration.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Records every dispatched event, see [`procsim::Simulation::trace`].
    #[must_use]
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Validates the configuration and builds the line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<Line> {
        let config = self.config;
        let counts = self.counts.unwrap_or_else(|| config.machine_counts());
        config.validate_with_counts(&counts)?;

        let sampler = match self.seed.or(config.seed) {
            Some(seed) => Sampler::seeded(seed),
            None => Sampler::from_entropy(),
        };
        let mut simulation = Simulation::default();
        if self.trace {
            simulation.enable_trace();
        }
        if let Some(recorder) = &self.recorder {
            let recorder = Rc::clone(recorder);
            simulation.set_level_observer(move |time, buffer, level| {
                recorder.borrow_mut().record_level(time, buffer, level);
            });
        }

        let mut buffers = Vec::with_capacity(config.stages.len() + 1);
        buffers.push(simulation.add_buffer(named(&config.input_buffer, "input"))?);
        for stage in &config.stages {
            buffers.push(simulation.add_buffer(named(&stage.output_buffer, &stage.name))?);
        }

        let source = ArrivalSource::new(&config.arrivals, buffers[0], sampler.clone())?;
        let arrivals = source.stats();
        simulation.add_process(source);

        let mut machines = Vec::new();
        let mut stages = Vec::with_capacity(config.stages.len());
        for (idx, (spec, &count)) in config.stages.iter().zip(&counts).enumerate() {
            let params = config.machine_params(idx);
            let mut ids = Vec::with_capacity(count);
            for n in 0..count {
                let id = MachineId::from(machines.len());
                machines.push(Machine::spawn(
                    &mut simulation,
                    MachineSetup {
                        id,
                        stage: StageId::from(idx),
                        name: format!("{}#{}", spec.name, n),
                        params: params.clone(),
                        input: buffers[idx],
                        output: buffers[idx + 1],
                        sampler: sampler.clone(),
                        recorder: self.recorder.clone(),
                    },
                )?);
                ids.push(id);
            }
            stages.push(ids);
        }
        log::info!(
            "Built line with {} stages and {} machines",
            stages.len(),
            machines.len()
        );
        Ok(Line {
            simulation,
            config,
            buffers,
            stages,
            machines,
            arrivals,
        })
    }
}

fn named(options: &BufferOptions, name: &str) -> BufferOptions {
    if options.name.is_empty() {
        options.clone().name(name)
    } else {
        options.clone()
    }
}

/// A production line ready to run: an arrival source feeding a chain of buffers and machine
/// pools, where stage `i` reads from buffer `i` and writes to buffer `i + 1`.
pub struct Line {
    simulation: Simulation,
    config: LineConfig,
    buffers: Vec<BufferId>,
    stages: Vec<Vec<MachineId>>,
    machines: Vec<Machine>,
    arrivals: Rc<Cell<ArrivalStats>>,
}

impl Line {
    /// Runs the line up to and including time `until`. Can be called again to continue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the horizon is invalid or the engine fails.
    pub fn run(&mut self, until: Time) -> Result<Time> {
        let time = self.simulation.run(until)?;
        log::info!(
            "[{}] Arrived: {}, finished: {}",
            time,
            self.arrivals.get().arrived,
            self.finished(self.stages.len() - 1)
        );
        Ok(time)
    }

    /// Executes a single event. Returns `false` if none were left.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn step(&mut self) -> Result<bool> {
        Ok(self.simulation.step()?)
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> Time {
        self.simulation.time()
    }

    /// Forces `machine` to break down now. Returns `false` if the machine was not suspended and
    /// nothing happened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMachine`] if no such machine exists.
    pub fn break_down(&mut self, machine: MachineId) -> Result<bool> {
        let machine = self
            .machines
            .get(usize::from(machine))
            .ok_or(Error::UnknownMachine(machine))?;
        Ok(machine.break_down(&mut self.simulation)?)
    }

    /// Configuration the line was built from.
    #[must_use]
    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    /// Underlying simulation.
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Returns the machine with the given ID.
    #[must_use]
    pub fn machine(&self, id: MachineId) -> Option<&Machine> {
        self.machines.get(usize::from(id))
    }

    /// All machines, ordered by ID.
    #[must_use]
    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// Machines of stage `stage`.
    pub fn stage_machines(&self, stage: StageId) -> impl Iterator<Item = &Machine> {
        self.stages
            .get(usize::from(stage))
            .into_iter()
            .flatten()
            .filter_map(move |&id| self.machine(id))
    }

    /// Buffer IDs in line order: the input buffer first, the sink last.
    #[must_use]
    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    /// Returns the buffer with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if no such buffer exists.
    pub fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        Ok(self.simulation.buffer(id)?)
    }

    /// Deliveries so far.
    #[must_use]
    pub fn arrivals(&self) -> ArrivalStats {
        self.arrivals.get()
    }

    /// Total output of the machines of stage `stage`.
    #[must_use]
    pub fn finished(&self, stage: usize) -> f64 {
        self.stage_machines(StageId::from(stage))
            .map(|m| m.stats().finished)
            .sum()
    }

    /// Collects the results of the run so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        let stages = self
            .config
            .stages
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                let id = StageId::from(idx);
                StageReport {
                    id,
                    name: spec.name.clone(),
                    machines: self.stages[idx].len(),
                    finished: self.finished(idx),
                    breakdowns: self
                        .stage_machines(id)
                        .map(|m| m.stats().breakdowns)
                        .sum(),
                }
            })
            .collect();
        let buffers = self
            .simulation
            .buffers()
            .map(|b| BufferReport {
                id: b.id(),
                name: b.name().to_string(),
                capacity: b.capacity(),
                level: b.level(),
                history: b.history().to_vec(),
            })
            .collect();
        let machines = self
            .machines
            .iter()
            .map(|m| MachineReport {
                id: m.id(),
                stage: m.stage(),
                state: m.state(),
                stats: m.stats(),
                events: m.events(),
            })
            .collect();
        RunReport {
            horizon: self.time(),
            arrivals: self.arrivals(),
            stages,
            buffers,
            machines,
        }
    }
}
