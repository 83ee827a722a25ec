use std::collections::VecDeque;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::{Error, ProcessId, Result, Signal, Time, EPSILON};

/// Identifies a buffer registered in a simulation.
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
pub struct BufferId(usize);

/// What to do with a request that can never be satisfied because it exceeds the capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Fail the request with [`Error::OversizedRequest`].
    Reject,
    /// Queue the request anyway. It blocks the queue forever.
    Park,
}

impl Default for OversizePolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Buffer level observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSample {
    /// Time of the observation.
    pub time: Time,
    /// Level after the change.
    pub level: f64,
}

/// Parameters of a new buffer.
///
/// # Examples
///
/// ```
/// # use procsim::{BufferOptions, OversizePolicy};
/// let options = BufferOptions::bounded(10.0)
///     .initial_level(4.0)
///     .oversize(OversizePolicy::Park);
/// assert_eq!(options.capacity, Some(10.0));
/// assert_eq!(BufferOptions::unbounded().capacity, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferOptions {
    /// Name used in logs and reports.
    #[serde(default)]
    pub name: String,
    /// Maximum level. `None` means unbounded.
    #[serde(default)]
    pub capacity: Option<f64>,
    /// Level at creation time.
    #[serde(default)]
    pub initial_level: f64,
    /// Treatment of requests exceeding `capacity`.
    #[serde(default)]
    pub oversize: OversizePolicy,
}

impl BufferOptions {
    /// Options of an unbounded, initially empty buffer.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Options of a bounded, initially empty buffer.
    #[must_use]
    pub fn bounded(capacity: f64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the initial level.
    #[must_use]
    pub fn initial_level(mut self, level: f64) -> Self {
        self.initial_level = level;
        self
    }

    /// Sets the oversize policy.
    #[must_use]
    pub fn oversize(mut self, policy: OversizePolicy) -> Self {
        self.oversize = policy;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Request {
    process: ProcessId,
    amount: f64,
}

/// Quantity container with blocking, all-or-nothing `get` and `put` requests.
///
/// Requests that cannot be satisfied immediately wait in one of two FIFO queues. Waiters are
/// always serviced in the order they arrived: a large request at the head blocks any smaller
/// request behind it. Every successful `get` or `put` appends a sample to the level history.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    name: String,
    level: f64,
    capacity: Option<f64>,
    oversize: OversizePolicy,
    getters: VecDeque<Request>,
    putters: VecDeque<Request>,
    history: Vec<LevelSample>,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, options: BufferOptions, time: Time) -> Result<Self> {
        if let Some(capacity) = options.capacity {
            if !capacity.is_finite() || capacity < 0.0 {
                return Err(Error::InvalidCapacity(capacity));
            }
        }
        let level = options.initial_level;
        if !level.is_finite()
            || level < 0.0
            || options.capacity.map_or(false, |c| level > c + EPSILON)
        {
            return Err(Error::InvalidLevel(level));
        }
        Ok(Self {
            id,
            name: options.name,
            level,
            capacity: options.capacity,
            oversize: options.oversize,
            getters: VecDeque::new(),
            putters: VecDeque::new(),
            history: vec![LevelSample { time, level }],
        })
    }

    /// Buffer ID.
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Buffer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Capacity, or `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<f64> {
        self.capacity
    }

    /// Quantity that can still be put without blocking.
    #[must_use]
    pub fn space(&self) -> f64 {
        self.capacity
            .map_or(f64::INFINITY, |c| (c - self.level).max(0.0))
    }

    /// Treatment of requests exceeding the capacity.
    #[must_use]
    pub fn oversize_policy(&self) -> OversizePolicy {
        self.oversize
    }

    /// Level history, starting with the level at creation time.
    #[must_use]
    pub fn history(&self) -> &[LevelSample] {
        &self.history
    }

    /// Number of processes waiting to get.
    #[must_use]
    pub fn waiting_getters(&self) -> usize {
        self.getters.len()
    }

    /// Number of processes waiting to put.
    #[must_use]
    pub fn waiting_putters(&self) -> usize {
        self.putters.len()
    }

    fn check(&self, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::InvalidAmount {
                buffer: self.id,
                amount,
            });
        }
        match self.capacity {
            Some(capacity) if amount > capacity + EPSILON => match self.oversize {
                OversizePolicy::Reject => Err(Error::OversizedRequest {
                    buffer: self.id,
                    amount,
                    capacity,
                }),
                OversizePolicy::Park => {
                    log::debug!(
                        "Buffer {} parks request of {} exceeding capacity {}",
                        self.id,
                        amount,
                        capacity
                    );
                    Ok(())
                }
            },
            _ => Ok(()),
        }
    }

    /// Queues a `get` request of `process` and services the queues.
    /// Returns the processes whose requests were satisfied, in order.
    pub(crate) fn get(
        &mut self,
        process: ProcessId,
        amount: f64,
        time: Time,
    ) -> Result<Vec<(ProcessId, Signal)>> {
        self.check(amount)?;
        self.getters.push_back(Request { process, amount });
        Ok(self.settle(time))
    }

    /// Queues a `put` request of `process` and services the queues.
    /// Returns the processes whose requests were satisfied, in order.
    pub(crate) fn put(
        &mut self,
        process: ProcessId,
        amount: f64,
        time: Time,
    ) -> Result<Vec<(ProcessId, Signal)>> {
        self.check(amount)?;
        self.putters.push_back(Request { process, amount });
        Ok(self.settle(time))
    }

    /// Removes any pending request of `process`. Returns `true` if one was found.
    pub(crate) fn withdraw(&mut self, process: ProcessId) -> bool {
        let before = self.getters.len() + self.putters.len();
        self.getters.retain(|r| r.process != process);
        self.putters.retain(|r| r.process != process);
        before != self.getters.len() + self.putters.len()
    }

    /// Grants head requests of both queues for as long as any of them can be satisfied.
    pub(crate) fn settle(&mut self, time: Time) -> Vec<(ProcessId, Signal)> {
        let mut granted = Vec::new();
        loop {
            let mut progress = false;
            if let Some(&Request { process, amount }) = self.getters.front() {
                if amount <= self.level + EPSILON {
                    self.getters.pop_front();
                    self.level = (self.level - amount).max(0.0);
                    self.record(time);
                    granted.push((process, Signal::Acquired));
                    progress = true;
                }
            }
            if let Some(&Request { process, amount }) = self.putters.front() {
                if amount <= self.space() + EPSILON {
                    self.putters.pop_front();
                    self.level += amount;
                    if let Some(capacity) = self.capacity {
                        self.level = self.level.min(capacity);
                    }
                    self.record(time);
                    granted.push((process, Signal::Stored));
                    progress = true;
                }
            }
            if !progress {
                return granted;
            }
        }
    }

    fn record(&mut self, time: Time) {
        self.history.push(LevelSample {
            time,
            level: self.level,
        });
    }
}
