use std::cell::RefCell;
use std::rc::Rc;

use procsim::{
    Await, BufferId, Context, OversizePolicy, Process, ProcessId, Signal, Simulation, Time,
    EPSILON,
};
use rand_distr::{Bernoulli, Exp, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use crate::{
    BreakdownPolicy, ConfigError, MachineId, MachineParams, RepairModel, Sampler, SharedRecorder,
    StageId,
};

/// Observable state of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::ToString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// Not started yet.
    Idle,
    /// Waiting for a batch from the input buffer.
    Acquiring,
    /// Working on a batch.
    Processing,
    /// Waiting for space in the output buffer.
    Unloading,
    /// Broken down and being repaired.
    Broken,
}

/// Something that happened to a machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineEvent {
    /// A batch was taken from the input buffer and processing started.
    Started,
    /// Output was placed in the output buffer.
    Finished {
        /// Output quantity.
        quantity: f64,
    },
    /// A whole batch failed and was scrapped.
    BatchFailed {
        /// Scrapped quantity.
        quantity: f64,
    },
    /// The machine broke down.
    BrokeDown {
        /// Quantity lost with the batch that was in progress.
        discarded: f64,
    },
    /// The repair finished.
    Repaired,
}

/// Machine event with the time it happened at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedMachineEvent {
    /// Simulation time.
    pub time: Time,
    /// Event.
    #[serde(flatten)]
    pub event: MachineEvent,
}

/// Counters of a machine.
///
/// Quantities satisfy `consumed = finished + in_flight + scrapped + discarded + yield_loss`.
/// The yield loss is negative whenever the output of a batch exceeds the batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStats {
    /// Quantity taken from the input buffer.
    pub consumed: f64,
    /// Quantity placed in the output buffer.
    pub finished: f64,
    /// Quantity of failed batches.
    pub scrapped: f64,
    /// Quantity lost to breakdowns.
    pub discarded: f64,
    /// Difference between batch sizes and produced output.
    pub yield_loss: f64,
    /// Quantity currently held by the machine: a batch being processed or output being unloaded.
    pub in_flight: f64,
    /// Output drawn above the capacity of a rejecting output buffer and cut off.
    /// Already included in the yield loss.
    pub truncated: f64,
    /// Number of started batches.
    pub batches_started: usize,
    /// Number of batches whose output was stored.
    pub batches_finished: usize,
    /// Number of failed batches.
    pub batches_failed: usize,
    /// Number of breakdowns.
    pub breakdowns: usize,
    /// Number of finished repairs.
    pub repairs: usize,
    /// Total time spent processing batches.
    pub operating_hours: Time,
}

#[derive(Debug, Clone, Copy)]
enum RepairDistribution {
    Fixed(Time),
    LogNormal(LogNormal<f64>),
    Normal(Normal<f64>),
}

impl RepairDistribution {
    fn new(owner: &str, params: &MachineParams) -> Result<Self, ConfigError> {
        let (mean, sigma) = (params.mttr, params.repair_sigma);
        let invalid = |e: rand_distr::NormalError| ConfigError::InvalidDistribution {
            owner: owner.to_string(),
            name: "repair",
            reason: e.to_string(),
        };
        match params.repair_model {
            RepairModel::LogNormal => {
                if mean <= 0.0 || sigma <= 0.0 {
                    return Ok(Self::Fixed(mean.max(0.0)));
                }
                // Moment matching: mean and standard deviation of the log-normal itself.
                let variance = (1.0 + (sigma / mean).powi(2)).ln();
                let mu = mean.ln() - variance / 2.0;
                LogNormal::new(mu, variance.sqrt())
                    .map(Self::LogNormal)
                    .map_err(invalid)
            }
            RepairModel::LogOfLogNormal => Normal::new(mean, sigma)
                .map(Self::Normal)
                .map_err(invalid),
            RepairModel::RawLogNormal => LogNormal::new(mean, sigma)
                .map(Self::LogNormal)
                .map_err(invalid),
        }
    }

    fn draw(&self, sampler: &Sampler) -> Time {
        match self {
            Self::Fixed(duration) => *duration,
            Self::LogNormal(dist) => sampler.non_negative(dist),
            Self::Normal(dist) => sampler.non_negative(dist),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Distributions {
    cycle_time: Normal<f64>,
    output: Normal<f64>,
    success: Bernoulli,
    time_to_failure: Option<Exp<f64>>,
    repair: RepairDistribution,
}

impl Distributions {
    fn new(owner: &str, params: &MachineParams) -> Result<Self, ConfigError> {
        let invalid = |name: &'static str, reason: String| ConfigError::InvalidDistribution {
            owner: owner.to_string(),
            name,
            reason,
        };
        let cycle_time = Normal::new(params.cycle_time, params.cycle_time_sigma)
            .map_err(|e| invalid("cycle_time", e.to_string()))?;
        let output = Normal::new(params.batch_size * params.yield_rate, params.yield_sigma)
            .map_err(|e| invalid("output", e.to_string()))?;
        let success = Bernoulli::new(1.0 - params.batch_failure_rate)
            .map_err(|e| invalid("batch_success", e.to_string()))?;
        let time_to_failure = match params.mtbf {
            Some(mtbf) => Some(
                Exp::new(1.0 / mtbf).map_err(|e| invalid("time_to_failure", e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            cycle_time,
            output,
            success,
            time_to_failure,
            repair: RepairDistribution::new(owner, params)?,
        })
    }
}

/// State shared between the production and breakdown processes of a machine.
struct MachineCore {
    id: MachineId,
    params: MachineParams,
    dists: Distributions,
    sampler: Sampler,
    recorder: Option<SharedRecorder>,
    state: MachineState,
    stats: MachineStats,
    events: Vec<TimedMachineEvent>,
    processing_since: Option<Time>,
    pending_repair: Option<Time>,
    threshold: Time,
}

impl MachineCore {
    fn transition(&mut self, time: Time, to: MachineState) {
        if self.state == to {
            return;
        }
        log::debug!(
            "[{}] Machine {}: {} -> {}",
            time,
            self.id,
            self.state.to_string(),
            to.to_string()
        );
        if let Some(recorder) = &self.recorder {
            recorder
                .borrow_mut()
                .record_transition(time, self.id, self.state, to);
        }
        self.state = to;
    }

    fn log(&mut self, time: Time, event: MachineEvent) {
        self.events.push(TimedMachineEvent { time, event });
    }

    fn operating_at(&self, time: Time) -> Time {
        self.stats.operating_hours + self.processing_since.map_or(0.0, |since| time - since)
    }

    fn stop_processing(&mut self, time: Time) {
        if let Some(since) = self.processing_since.take() {
            self.stats.operating_hours += time - since;
        }
    }

    fn draw_repair(&self) -> Time {
        self.dists.repair.draw(&self.sampler)
    }

    fn take_repair(&mut self) -> Time {
        match self.pending_repair.take() {
            Some(duration) => duration,
            None => self.draw_repair(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Acquiring,
    Processing,
    Unloading(f64),
    Repairing,
}

/// Production loop: acquire a batch, process it, unload the output, repeat.
/// Any interrupt is a breakdown, followed by a repair.
struct Production {
    core: Rc<RefCell<MachineCore>>,
    input: BufferId,
    output: BufferId,
    phase: Phase,
}

impl Production {
    fn acquire(&mut self, time: Time) -> Await {
        let mut core = self.core.borrow_mut();
        core.transition(time, MachineState::Acquiring);
        self.phase = Phase::Acquiring;
        Await::Get {
            buffer: self.input,
            amount: core.params.batch_size,
        }
    }

    fn process(&mut self, time: Time) -> Await {
        let mut core = self.core.borrow_mut();
        let batch = core.params.batch_size;
        core.stats.consumed += batch;
        core.stats.in_flight += batch;
        core.stats.batches_started += 1;
        core.log(time, MachineEvent::Started);
        core.transition(time, MachineState::Processing);
        core.processing_since = Some(time);
        let cycle_time = core.sampler.non_negative(&core.dists.cycle_time);
        self.phase = Phase::Processing;
        Await::Timeout(cycle_time)
    }

    fn complete(&mut self, ctx: &Context<'_>) -> procsim::Result<Await> {
        let time = ctx.time();
        let output = ctx.buffer(self.output)?;
        let limit = match output.oversize_policy() {
            OversizePolicy::Reject => output.capacity(),
            OversizePolicy::Park => None,
        };
        let mut core = self.core.borrow_mut();
        let batch = core.params.batch_size;
        core.stop_processing(time);
        if !core.sampler.chance(&core.dists.success) {
            core.stats.scrapped += batch;
            core.stats.in_flight -= batch;
            core.stats.batches_failed += 1;
            core.log(time, MachineEvent::BatchFailed { quantity: batch });
            drop(core);
            return Ok(self.acquire(time));
        }
        let mut quantity = core.sampler.non_negative(&core.dists.output);
        if let Some(limit) = limit {
            if quantity > limit {
                log::debug!(
                    "[{}] Machine {}: output {} cut to capacity {}",
                    time,
                    core.id,
                    quantity,
                    limit
                );
                core.stats.truncated += quantity - limit;
                quantity = limit;
            }
        }
        core.stats.yield_loss += batch - quantity;
        core.stats.in_flight += quantity - batch;
        core.transition(time, MachineState::Unloading);
        self.phase = Phase::Unloading(quantity);
        Ok(Await::Put {
            buffer: self.output,
            amount: quantity,
        })
    }

    fn unloaded(&mut self, time: Time, quantity: f64) -> Await {
        {
            let mut core = self.core.borrow_mut();
            core.stats.finished += quantity;
            core.stats.in_flight -= quantity;
            core.stats.batches_finished += 1;
            core.log(time, MachineEvent::Finished { quantity });
        }
        self.acquire(time)
    }

    fn repaired(&mut self, time: Time) -> Await {
        {
            let mut core = self.core.borrow_mut();
            core.stats.repairs += 1;
            core.log(time, MachineEvent::Repaired);
            log::debug!("[{}] Machine {} repaired", time, core.id);
        }
        self.acquire(time)
    }

    fn break_down(&mut self, time: Time) -> Await {
        let mut core = self.core.borrow_mut();
        let discarded = match self.phase {
            Phase::Idle | Phase::Acquiring => 0.0,
            Phase::Processing => {
                core.stop_processing(time);
                core.params.batch_size
            }
            Phase::Unloading(quantity) => quantity,
            Phase::Repairing => {
                let duration = core.take_repair();
                log::debug!(
                    "[{}] Machine {} restarts repair for {}",
                    time,
                    core.id,
                    duration
                );
                return Await::Timeout(duration);
            }
        };
        core.stats.discarded += discarded;
        core.stats.in_flight -= discarded;
        core.stats.breakdowns += 1;
        core.log(time, MachineEvent::BrokeDown { discarded });
        core.transition(time, MachineState::Broken);
        let duration = core.take_repair();
        log::debug!(
            "[{}] Machine {} broke down, discarding {}, repair takes {}",
            time,
            core.id,
            discarded,
            duration
        );
        self.phase = Phase::Repairing;
        Await::Timeout(duration)
    }
}

impl Process for Production {
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> procsim::Result<Await> {
        let time = ctx.time();
        match (self.phase, signal) {
            (Phase::Idle, Signal::Start) => Ok(self.acquire(time)),
            (Phase::Acquiring, Signal::Acquired) => Ok(self.process(time)),
            (Phase::Processing, Signal::Timeout) => self.complete(ctx),
            (Phase::Unloading(quantity), Signal::Stored) => Ok(self.unloaded(time, quantity)),
            (Phase::Repairing, Signal::Timeout) => Ok(self.repaired(time)),
            (_, Signal::Interrupted) => Ok(self.break_down(time)),
            (_, signal) => Err(procsim::Error::UnexpectedSignal {
                process: ctx.id(),
                signal,
            }),
        }
    }
}

/// Failure loop: waits for the next breakdown, then interrupts the production process.
struct Breakdown {
    core: Rc<RefCell<MachineCore>>,
    production: ProcessId,
    time_to_failure: Exp<f64>,
}

impl Breakdown {
    /// Draws the next time to failure, and returns how long to wait before checking for it.
    fn arm(&self, time: Time) -> Time {
        let mut core = self.core.borrow_mut();
        let ttf = core.sampler.non_negative(&self.time_to_failure);
        if core.params.breakdown_policy == BreakdownPolicy::OperatingHours {
            core.threshold = core.operating_at(time) + ttf;
        }
        ttf
    }

    /// Interrupts production. Returns the repair duration if the breakdown happened.
    fn trigger(&self, ctx: &mut Context<'_>) -> procsim::Result<Option<Time>> {
        let repair = self.core.borrow().draw_repair();
        self.core.borrow_mut().pending_repair = Some(repair);
        if ctx.interrupt(self.production)? {
            Ok(Some(repair))
        } else {
            let mut core = self.core.borrow_mut();
            core.pending_repair = None;
            log::warn!(
                "[{}] Machine {} is not suspended, breakdown skipped",
                ctx.time(),
                core.id
            );
            Ok(None)
        }
    }

    fn check(&self, ctx: &mut Context<'_>) -> procsim::Result<Await> {
        let time = ctx.time();
        let (policy, remaining) = {
            let core = self.core.borrow();
            (
                core.params.breakdown_policy,
                core.threshold - core.operating_at(time),
            )
        };
        if policy == BreakdownPolicy::OperatingHours && remaining > EPSILON {
            return Ok(Await::Timeout(remaining));
        }
        let repair = self.trigger(ctx)?.unwrap_or(0.0);
        Ok(Await::Timeout(repair + self.arm(time)))
    }
}

impl Process for Breakdown {
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> procsim::Result<Await> {
        match signal {
            Signal::Start | Signal::Interrupted => Ok(Await::Timeout(self.arm(ctx.time()))),
            Signal::Timeout => self.check(ctx),
            signal => Err(procsim::Error::UnexpectedSignal {
                process: ctx.id(),
                signal,
            }),
        }
    }
}

/// A machine of a production stage, taking batches from its input buffer and putting the
/// output into its output buffer.
///
/// A machine is driven by a production process and, if it has a finite mean time between
/// failures, by a breakdown process interrupting production.
pub struct Machine {
    id: MachineId,
    stage: StageId,
    input: BufferId,
    output: BufferId,
    production: ProcessId,
    breakdown: Option<ProcessId>,
    core: Rc<RefCell<MachineCore>>,
}

/// Everything needed to add a machine to a simulation.
pub(crate) struct MachineSetup {
    pub id: MachineId,
    pub stage: StageId,
    pub name: String,
    pub params: MachineParams,
    pub input: BufferId,
    pub output: BufferId,
    pub sampler: Sampler,
    pub recorder: Option<SharedRecorder>,
}

impl Machine {
    /// Adds the processes of a new machine to `simulation`.
    pub(crate) fn spawn(
        simulation: &mut Simulation,
        setup: MachineSetup,
    ) -> Result<Self, ConfigError> {
        let dists = Distributions::new(&setup.name, &setup.params)?;
        let core = Rc::new(RefCell::new(MachineCore {
            id: setup.id,
            params: setup.params,
            dists,
            sampler: setup.sampler,
            recorder: setup.recorder,
            state: MachineState::Idle,
            stats: MachineStats::default(),
            events: Vec::new(),
            processing_since: None,
            pending_repair: None,
            threshold: 0.0,
        }));
        let production = simulation.add_process(Production {
            core: Rc::clone(&core),
            input: setup.input,
            output: setup.output,
            phase: Phase::Idle,
        });
        let breakdown = dists.time_to_failure.map(|time_to_failure| {
            simulation.add_process(Breakdown {
                core: Rc::clone(&core),
                production,
                time_to_failure,
            })
        });
        Ok(Self {
            id: setup.id,
            stage: setup.stage,
            input: setup.input,
            output: setup.output,
            production,
            breakdown,
            core,
        })
    }

    /// Machine ID.
    #[must_use]
    pub fn id(&self) -> MachineId {
        self.id
    }

    /// Stage the machine belongs to.
    #[must_use]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Buffer the machine takes batches from.
    #[must_use]
    pub fn input(&self) -> BufferId {
        self.input
    }

    /// Buffer the machine puts its output into.
    #[must_use]
    pub fn output(&self) -> BufferId {
        self.output
    }

    /// Process running the production loop.
    #[must_use]
    pub fn production(&self) -> ProcessId {
        self.production
    }

    /// Process triggering breakdowns, if the machine can break down.
    #[must_use]
    pub fn breakdown(&self) -> Option<ProcessId> {
        self.breakdown
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.core.borrow().state
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> MachineStats {
        self.core.borrow().stats
    }

    /// Parameters the machine was built with.
    #[must_use]
    pub fn params(&self) -> MachineParams {
        self.core.borrow().params.clone()
    }

    /// Events logged so far, in chronological order.
    #[must_use]
    pub fn events(&self) -> Vec<TimedMachineEvent> {
        self.core.borrow().events.clone()
    }

    /// Cumulative processing time up to `time`, including the batch in progress.
    #[must_use]
    pub fn operating_hours(&self, time: Time) -> Time {
        self.core.borrow().operating_at(time)
    }

    /// Forces a breakdown now. The repair duration is drawn when the breakdown is handled.
    /// Returns `false` if production was not suspended and the breakdown did not happen.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn break_down(&self, simulation: &mut Simulation) -> procsim::Result<bool> {
        self.core.borrow_mut().pending_repair = None;
        simulation.interrupt(self.production)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::LineConfig;
    use procsim::BufferOptions;

    fn params(stage: crate::StageSpec) -> MachineParams {
        LineConfig::new(vec![stage]).machine_params(0)
    }

    fn deterministic() -> crate::StageSpec {
        crate::StageSpec {
            cycle_time: 2.0,
            cycle_time_sigma: Some(0.0),
            batch_size: 4.0,
            ..crate::StageSpec::default()
        }
    }

    fn spawn(sim: &mut Simulation, params: MachineParams, input: BufferId) -> (Machine, BufferId) {
        let output = sim.add_buffer(BufferOptions::unbounded()).unwrap();
        (spawn_into(sim, params, input, output), output)
    }

    fn spawn_into(
        sim: &mut Simulation,
        params: MachineParams,
        input: BufferId,
        output: BufferId,
    ) -> Machine {
        Machine::spawn(
            sim,
            MachineSetup {
                id: MachineId::from(0),
                stage: StageId::from(0),
                name: String::from("machine"),
                params,
                input,
                output,
                sampler: Sampler::seeded(7),
                recorder: None,
            },
        )
        .unwrap()
    }

    fn breakdown_times(machine: &Machine) -> Vec<Time> {
        machine
            .events()
            .into_iter()
            .filter(|e| matches!(e.event, MachineEvent::BrokeDown { .. }))
            .map(|e| e.time)
            .collect()
    }

    #[test]
    fn test_production_cycle() {
        let mut sim = Simulation::default();
        let input = sim
            .add_buffer(BufferOptions::unbounded().initial_level(10.0))
            .unwrap();
        let (machine, output) = spawn(&mut sim, params(deterministic()), input);
        assert!(machine.breakdown().is_none());
        assert_eq!(machine.state(), MachineState::Idle);
        sim.run(3.0).unwrap();
        assert_eq!(machine.state(), MachineState::Processing);
        assert_eq!(sim.buffer(output).unwrap().level(), 4.0);
        sim.run(f64::INFINITY).unwrap();
        assert_eq!(machine.state(), MachineState::Acquiring);
        let stats = machine.stats();
        assert_eq!(stats.finished, 8.0);
        assert_eq!(stats.consumed, 8.0);
        assert_eq!(stats.in_flight, 0.0);
        assert_eq!(stats.operating_hours, 4.0);
        assert_eq!(sim.buffer(input).unwrap().level(), 2.0);
        assert_eq!(
            machine.events(),
            vec![
                TimedMachineEvent {
                    time: 0.0,
                    event: MachineEvent::Started
                },
                TimedMachineEvent {
                    time: 2.0,
                    event: MachineEvent::Finished { quantity: 4.0 }
                },
                TimedMachineEvent {
                    time: 2.0,
                    event: MachineEvent::Started
                },
                TimedMachineEvent {
                    time: 4.0,
                    event: MachineEvent::Finished { quantity: 4.0 }
                },
            ]
        );
    }

    #[test]
    fn test_forced_breakdown_discards_batch() {
        let mut sim = Simulation::default();
        let input = sim
            .add_buffer(BufferOptions::unbounded().initial_level(100.0))
            .unwrap();
        let stage = crate::StageSpec {
            mttr_days: 0.25,
            repair_sigma: 0.0,
            ..deterministic()
        };
        let (machine, _) = spawn(&mut sim, params(stage), input);
        sim.run(1.0).unwrap();
        assert!(machine.break_down(&mut sim).unwrap());
        sim.run(1.0).unwrap();
        assert_eq!(machine.state(), MachineState::Broken);
        assert_eq!(machine.stats().discarded, 4.0);
        assert_eq!(machine.operating_hours(1.0), 1.0);
        sim.run(4.999).unwrap();
        assert_eq!(machine.state(), MachineState::Broken);
        sim.run(5.0).unwrap();
        assert_eq!(machine.state(), MachineState::Processing);
        let stats = machine.stats();
        assert_eq!(stats.breakdowns, 1);
        assert_eq!(stats.repairs, 1);
        assert_eq!(stats.in_flight, 4.0);
    }

    #[test]
    fn test_interrupt_during_repair_restarts_it() {
        let mut sim = Simulation::default();
        let input = sim.add_buffer(BufferOptions::unbounded()).unwrap();
        let stage = crate::StageSpec {
            mttr_days: 0.125,
            repair_sigma: 0.0,
            ..deterministic()
        };
        let (machine, _) = spawn(&mut sim, params(stage), input);
        sim.run(1.0).unwrap();
        assert!(machine.break_down(&mut sim).unwrap());
        sim.run(2.0).unwrap();
        assert!(machine.break_down(&mut sim).unwrap());
        sim.run(3.0).unwrap();
        assert_eq!(machine.state(), MachineState::Broken);
        sim.run(4.0).unwrap();
        assert_eq!(machine.state(), MachineState::Acquiring);
        let stats = machine.stats();
        assert_eq!(stats.breakdowns, 1);
        assert_eq!(stats.repairs, 1);
        assert_eq!(stats.discarded, 0.0);
    }

    #[test]
    fn test_breakdown_process_spawned_with_mtbf() {
        let mut sim = Simulation::default();
        let input = sim
            .add_buffer(BufferOptions::unbounded().initial_level(1e6))
            .unwrap();
        let stage = crate::StageSpec {
            mtbf_days: Some(0.5),
            mttr_days: 0.1,
            ..deterministic()
        };
        let (machine, _) = spawn(&mut sim, params(stage), input);
        assert!(machine.breakdown().is_some());
        sim.run(500.0).unwrap();
        let stats = machine.stats();
        assert!(stats.breakdowns > 0);
        assert!(stats.repairs + 1 >= stats.breakdowns);
        assert!(stats.repairs <= stats.breakdowns);
    }

    #[test]
    fn test_breakdown_while_unloading_discards_output() {
        let mut sim = Simulation::default();
        let input = sim
            .add_buffer(BufferOptions::unbounded().initial_level(10.0))
            .unwrap();
        let output = sim
            .add_buffer(BufferOptions::bounded(4.0).initial_level(4.0))
            .unwrap();
        let stage = crate::StageSpec {
            mttr_days: 0.25,
            repair_sigma: 0.0,
            ..deterministic()
        };
        let machine = spawn_into(&mut sim, params(stage), input, output);
        sim.run(3.0).unwrap();
        assert_eq!(machine.state(), MachineState::Unloading);
        assert_eq!(machine.stats().in_flight, 4.0);
        assert_eq!(sim.buffer(output).unwrap().waiting_putters(), 1);

        assert!(machine.break_down(&mut sim).unwrap());
        sim.run(3.0).unwrap();
        assert_eq!(machine.state(), MachineState::Broken);
        let stats = machine.stats();
        assert_eq!(stats.in_flight, 0.0);
        assert_eq!(stats.discarded, 4.0);
        assert_eq!(stats.finished, 0.0);
        assert_eq!(stats.consumed, 4.0);
        assert_eq!(sim.buffer(output).unwrap().waiting_putters(), 0);
        assert_eq!(sim.buffer(output).unwrap().level(), 4.0);
        assert_eq!(
            machine.events().last(),
            Some(&TimedMachineEvent {
                time: 3.0,
                event: MachineEvent::BrokeDown { discarded: 4.0 }
            })
        );
    }

    #[test]
    fn test_timer_counts_down_after_repair() {
        let mut sim = Simulation::default();
        let input = sim.add_buffer(BufferOptions::unbounded()).unwrap();
        let stage = crate::StageSpec {
            mtbf_days: Some(1.0),
            mttr_days: 0.125,
            repair_sigma: 0.0,
            ..deterministic()
        };
        let params = params(stage);
        let repair = params.mttr;
        let mtbf = params.mtbf.unwrap();
        let (machine, _) = spawn(&mut sim, params, input);

        // A starved machine draws nothing but times to failure from the shared sampler.
        let replay = Sampler::seeded(7);
        let time_to_failure = Exp::new(1.0 / mtbf).unwrap();
        let first = replay.non_negative(&time_to_failure);
        let second = replay.non_negative(&time_to_failure);
        sim.run(first + repair + second + 1.0).unwrap();

        let breakdowns = breakdown_times(&machine);
        assert!(breakdowns.len() >= 2);
        assert!(float_cmp::approx_eq!(f64, breakdowns[0], first, epsilon = 1e-9));
        let repaired: Vec<_> = machine
            .events()
            .into_iter()
            .filter(|e| e.event == MachineEvent::Repaired)
            .map(|e| e.time)
            .collect();
        assert!(float_cmp::approx_eq!(
            f64,
            repaired[0],
            first + repair,
            epsilon = 1e-9
        ));
        assert!(float_cmp::approx_eq!(
            f64,
            breakdowns[1] - repaired[0],
            second,
            epsilon = 1e-9
        ));
    }

    #[test]
    fn test_output_cut_to_rejecting_capacity() {
        let mut sim = Simulation::default();
        let input = sim
            .add_buffer(BufferOptions::unbounded().initial_level(1e6))
            .unwrap();
        let output = sim.add_buffer(BufferOptions::bounded(4.0)).unwrap();
        let stage = crate::StageSpec {
            yield_sigma: 2.0,
            ..deterministic()
        };
        let machine = spawn_into(&mut sim, params(stage), input, output);
        sim.add_process(move |ctx: &mut Context<'_>, _: Signal| -> procsim::Result<Await> {
            let level = ctx.buffer(output)?.level();
            Ok(if level > 0.0 {
                Await::Get {
                    buffer: output,
                    amount: level,
                }
            } else {
                Await::Timeout(0.5)
            })
        });
        sim.run(200.0).unwrap();
        let stats = machine.stats();
        assert!(stats.batches_finished > 10);
        assert!(stats.truncated > 0.0);
        assert!(machine.events().iter().all(|e| match e.event {
            MachineEvent::Finished { quantity } => quantity <= 4.0,
            _ => true,
        }));
    }

    #[test]
    fn test_repair_models() {
        let sampler = Sampler::seeded(1);
        let base = MachineParams {
            mttr: 10.0,
            repair_sigma: 2.0,
            ..params(deterministic())
        };
        let canonical = RepairDistribution::new("m", &base).unwrap();
        let mean = (0..20_000).map(|_| canonical.draw(&sampler)).sum::<f64>() / 20_000.0;
        assert!(float_cmp::approx_eq!(f64, mean, 10.0, epsilon = 0.1));

        let normal = RepairDistribution::new(
            "m",
            &MachineParams {
                repair_model: RepairModel::LogOfLogNormal,
                ..base.clone()
            },
        )
        .unwrap();
        let mean = (0..20_000).map(|_| normal.draw(&sampler)).sum::<f64>() / 20_000.0;
        assert!(float_cmp::approx_eq!(f64, mean, 10.0, epsilon = 0.1));

        let fixed = RepairDistribution::new(
            "m",
            &MachineParams {
                mttr: 0.0,
                ..base
            },
        )
        .unwrap();
        assert_eq!(fixed.draw(&sampler), 0.0);
    }
}
