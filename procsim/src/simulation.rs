use serde::{Deserialize, Serialize};

use crate::{
    Await, Buffer, BufferId, BufferOptions, ClockRef, Context, Error, Process, ProcessId,
    ProcessState, Result, Scheduler, Signal, Time, Wait,
};

/// A dispatched event, recorded when tracing is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Time of dispatch.
    pub time: Time,
    /// Resumed process.
    pub process: ProcessId,
    /// Signal the process was resumed with.
    pub signal: Signal,
}

type LevelObserver = Box<dyn FnMut(Time, BufferId, f64)>;

#[derive(Debug)]
struct Slot {
    state: ProcessState,
    token: u64,
}

/// Everything a process may touch while being resumed: clock, events, buffers,
/// and the states of all processes.
pub(crate) struct Kernel {
    scheduler: Scheduler,
    buffers: Vec<Buffer>,
    slots: Vec<Slot>,
    trace: Option<Vec<TraceEntry>>,
    level_observer: Option<LevelObserver>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            scheduler: Scheduler::default(),
            buffers: Vec::new(),
            slots: Vec::new(),
            trace: None,
            level_observer: None,
        }
    }
}

impl Kernel {
    pub(crate) fn time(&self) -> Time {
        self.scheduler.time()
    }

    pub(crate) fn clock(&self) -> ClockRef {
        self.scheduler.clock()
    }

    pub(crate) fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        self.buffers.get(usize::from(id)).ok_or(Error::UnknownBuffer(id))
    }

    pub(crate) fn state(&self, id: ProcessId) -> Result<ProcessState> {
        self.slot(id).map(|s| s.state)
    }

    fn slot(&self, id: ProcessId) -> Result<&Slot> {
        self.slots.get(usize::from(id)).ok_or(Error::UnknownProcess(id))
    }

    fn slot_mut(&mut self, id: ProcessId) -> Result<&mut Slot> {
        self.slots
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownProcess(id))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut Buffer> {
        self.buffers
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownBuffer(id))
    }

    /// Drops cancelled events from the head of the queue and returns the time of the next
    /// event that is still valid.
    fn next_valid_time(&mut self) -> Result<Option<Time>> {
        while let Some(entry) = self.scheduler.peek() {
            let (process, token, time) = (entry.process(), entry.token(), entry.time());
            if self.slot(process)?.token == token {
                return Ok(Some(time));
            }
            log::trace!("[{}] Skipping stale event for {}", time, process);
            self.scheduler.discard();
        }
        Ok(None)
    }

    /// Cancels the pending suspension of `target` and schedules an interrupt for it.
    pub(crate) fn interrupt(&mut self, target: ProcessId) -> Result<bool> {
        let now = self.time();
        let slot = self.slot_mut(target)?;
        let wait = match slot.state {
            ProcessState::Done => return Err(Error::InterruptFinished(target)),
            ProcessState::Runnable | ProcessState::Interrupted => {
                log::trace!("[{}] Interrupt of {} ignored", now, target);
                return Ok(false);
            }
            ProcessState::Suspended(wait) => wait,
        };
        slot.token += 1;
        slot.state = ProcessState::Interrupted;
        let token = slot.token;
        if let Wait::Get(buffer) | Wait::Put(buffer) = wait {
            let buf = self.buffer_mut(buffer)?;
            buf.withdraw(target);
            let before = buf.history().len();
            let granted = buf.settle(now);
            self.notify_levels(buffer, before)?;
            self.wake(granted)?;
        }
        log::trace!("[{}] Interrupting {} waiting on {:?}", now, target, wait);
        self.scheduler
            .schedule_immediately(target, Signal::Interrupted, token);
        Ok(true)
    }

    /// Schedules the resumption of processes whose buffer requests were granted.
    fn wake(&mut self, granted: Vec<(ProcessId, Signal)>) -> Result<()> {
        for (process, signal) in granted {
            let slot = self.slot_mut(process)?;
            slot.state = ProcessState::Runnable;
            let token = slot.token;
            self.scheduler.schedule_immediately(process, signal, token);
        }
        Ok(())
    }

    /// Forwards level samples recorded since `from` to the observer.
    fn notify_levels(&mut self, buffer: BufferId, from: usize) -> Result<()> {
        if let Some(observer) = self.level_observer.as_mut() {
            let samples = self
                .buffers
                .get(usize::from(buffer))
                .ok_or(Error::UnknownBuffer(buffer))?
                .history();
            for sample in samples.iter().skip(from) {
                observer(sample.time, buffer, sample.level);
            }
        }
        Ok(())
    }

    /// Registers the suspension requested by `process`.
    /// Returns the signal to resume it with right away if the request was granted immediately.
    fn suspend(&mut self, process: ProcessId, request: Await) -> Result<Option<Signal>> {
        let now = self.time();
        let slot = self.slot_mut(process)?;
        slot.token += 1;
        let token = slot.token;
        match request {
            Await::Done => {
                slot.state = ProcessState::Done;
                log::trace!("[{}] Process {} done", now, process);
                Ok(None)
            }
            Await::Timeout(delay) => {
                slot.state = ProcessState::Suspended(Wait::Timeout);
                self.scheduler
                    .schedule(delay, process, Signal::Timeout, token)?;
                Ok(None)
            }
            Await::Get { buffer, amount } | Await::Put { buffer, amount } => {
                let is_get = matches!(request, Await::Get { .. });
                slot.state = ProcessState::Suspended(if is_get {
                    Wait::Get(buffer)
                } else {
                    Wait::Put(buffer)
                });
                let (granted, before) = {
                    let buf = self.buffer_mut(buffer)?;
                    let before = buf.history().len();
                    let granted = if is_get {
                        buf.get(process, amount, now)?
                    } else {
                        buf.put(process, amount, now)?
                    };
                    (granted, before)
                };
                self.notify_levels(buffer, before)?;
                let mut own = None;
                let mut others = Vec::with_capacity(granted.len());
                for (p, signal) in granted {
                    if p == process {
                        own = Some(signal);
                    } else {
                        others.push((p, signal));
                    }
                }
                self.wake(others)?;
                if own.is_some() {
                    self.slot_mut(process)?.state = ProcessState::Runnable;
                }
                Ok(own)
            }
        }
    }
}

/// Discrete-event simulation: processes, buffers, and the scheduler driving them.
#[derive(Default)]
pub struct Simulation {
    kernel: Kernel,
    processes: Vec<Box<dyn Process>>,
}

impl Simulation {
    /// Adds a buffer created from `options`.
    ///
    /// # Errors
    ///
    /// Fails if the capacity or initial level of the buffer is invalid.
    pub fn add_buffer(&mut self, options: BufferOptions) -> Result<BufferId> {
        let id = BufferId::from(self.kernel.buffers.len());
        let buffer = Buffer::new(id, options, self.time())?;
        self.kernel.buffers.push(buffer);
        Ok(id)
    }

    /// Adds a process. It is started at the current time, after any events already due.
    pub fn add_process<P: Process + 'static>(&mut self, process: P) -> ProcessId {
        let id = ProcessId::from(self.processes.len());
        self.processes.push(Box::new(process));
        self.kernel.slots.push(Slot {
            state: ProcessState::Runnable,
            token: 0,
        });
        self.kernel.scheduler.schedule_immediately(id, Signal::Start, 0);
        id
    }

    /// Returns the buffer with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBuffer`] if no such buffer exists.
    pub fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        self.kernel.buffer(id)
    }

    /// Iterates over all buffers in the order they were added.
    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.kernel.buffers.iter()
    }

    /// Returns the current state of a process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProcess`] if no such process exists.
    pub fn state(&self, id: ProcessId) -> Result<ProcessState> {
        self.kernel.state(id)
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> Time {
        self.kernel.time()
    }

    /// Returns a structure with immutable access to the simulation time.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        self.kernel.clock()
    }

    /// Number of scheduled events, including cancelled ones not yet discarded.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.kernel.scheduler.len()
    }

    /// Registers a callback invoked with every new buffer level sample.
    pub fn set_level_observer<F>(&mut self, observer: F)
    where
        F: FnMut(Time, BufferId, f64) + 'static,
    {
        self.kernel.level_observer = Some(Box::new(observer));
    }

    /// Starts recording every dispatched event.
    pub fn enable_trace(&mut self) {
        if self.kernel.trace.is_none() {
            self.kernel.trace = Some(Vec::new());
        }
    }

    /// Events dispatched since tracing was enabled.
    #[must_use]
    pub fn trace(&self) -> &[TraceEntry] {
        self.kernel.trace.as_deref().unwrap_or(&[])
    }

    /// Interrupts `target`.
    ///
    /// If the target is suspended, its pending timeout or buffer request is cancelled and it is
    /// resumed with [`Signal::Interrupted`] at the current time, after events already due.
    /// Returns `true` in that case. If the target is runnable or already interrupted,
    /// nothing happens and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterruptFinished`] if the target has finished, and
    /// [`Error::UnknownProcess`] if it does not exist.
    pub fn interrupt(&mut self, target: ProcessId) -> Result<bool> {
        self.kernel.interrupt(target)
    }

    /// Executes the next event. Returns `false` if there were no events left.
    ///
    /// # Errors
    ///
    /// Propagates any error raised by the resumed process or by its suspension request.
    pub fn step(&mut self) -> Result<bool> {
        if self.kernel.next_valid_time()?.is_none() {
            return Ok(false);
        }
        let entry = match self.kernel.scheduler.pop() {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let process = entry.process();
        if let Some(trace) = self.kernel.trace.as_mut() {
            trace.push(TraceEntry {
                time: entry.time(),
                process,
                signal: entry.signal(),
            });
        }
        self.dispatch(process, entry.signal())?;
        Ok(true)
    }

    /// Executes all events scheduled up to and including `until`, and then moves the clock to
    /// `until`. Can be called repeatedly to continue the run. Passing infinity runs until no
    /// events are left. Returns the time at which the run stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHorizon`] if `until` is NaN or in the past, and propagates any
    /// error raised while executing events.
    pub fn run(&mut self, until: Time) -> Result<Time> {
        let now = self.time();
        if until.is_nan() || until < now {
            return Err(Error::InvalidHorizon { until, now });
        }
        while self
            .kernel
            .next_valid_time()?
            .map_or(false, |time| time <= until)
        {
            self.step()?;
        }
        if until.is_finite() {
            self.kernel.scheduler.advance_to(until);
        }
        log::debug!("Run stopped at {}", self.time());
        Ok(self.time())
    }

    /// Resumes `process` with `signal`, and keeps resuming it for as long as its requests are
    /// granted immediately.
    fn dispatch(&mut self, process: ProcessId, signal: Signal) -> Result<()> {
        let mut signal = signal;
        loop {
            self.kernel.slot_mut(process)?.state = ProcessState::Runnable;
            let body = self
                .processes
                .get_mut(usize::from(process))
                .ok_or(Error::UnknownProcess(process))?;
            let request = {
                let mut ctx = Context::new(&mut self.kernel, process);
                body.resume(&mut ctx, signal)?
            };
            match self.kernel.suspend(process, request)? {
                Some(next) => signal = next,
                None => return Ok(()),
            }
        }
    }
}
