use std::cell::Cell;
use std::rc::Rc;

use procsim::{Await, BufferId, Context, OversizePolicy, Process, Signal, Time};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::{ArrivalSpec, ConfigError, Sampler};

/// Deliveries made so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrivalStats {
    /// Number of completed deliveries.
    pub deliveries: usize,
    /// Total quantity delivered.
    pub arrived: f64,
    /// Quantity drawn above the capacity of a rejecting buffer and never delivered.
    pub truncated: f64,
}

/// Periodically delivers raw material into a buffer: waits for the next delivery, puts the
/// delivered quantity, and repeats.
///
/// Delivery sizes are capped at the buffer capacity unless the buffer parks oversized requests.
pub struct ArrivalSource {
    buffer: BufferId,
    interval: Normal<f64>,
    size: Normal<f64>,
    sampler: Sampler,
    stats: Rc<Cell<ArrivalStats>>,
    /// Amount being put and the part of the drawn size cut off from it.
    pending: Option<(f64, f64)>,
}

impl ArrivalSource {
    /// Constructs a source delivering into `buffer`.
    ///
    /// # Errors
    ///
    /// Fails if the distributions cannot be constructed from `spec`.
    pub fn new(spec: &ArrivalSpec, buffer: BufferId, sampler: Sampler) -> Result<Self, ConfigError> {
        let invalid = |name: &'static str, e: rand_distr::NormalError| {
            ConfigError::InvalidDistribution {
                owner: String::from("arrivals"),
                name,
                reason: e.to_string(),
            }
        };
        Ok(Self {
            buffer,
            interval: Normal::new(spec.interval, spec.interval_sigma)
                .map_err(|e| invalid("interval", e))?,
            size: Normal::new(spec.size, spec.size_sigma).map_err(|e| invalid("size", e))?,
            sampler,
            stats: Rc::new(Cell::new(ArrivalStats::default())),
            pending: None,
        })
    }

    /// Handle to the delivery counters, valid after the source is moved into a simulation.
    #[must_use]
    pub fn stats(&self) -> Rc<Cell<ArrivalStats>> {
        Rc::clone(&self.stats)
    }

    fn wait(&mut self) -> Await {
        self.pending = None;
        Await::Timeout(self.sampler.non_negative(&self.interval))
    }

    fn deliver(&mut self, ctx: &Context<'_>) -> procsim::Result<Await> {
        let buffer = ctx.buffer(self.buffer)?;
        let mut amount = self.sampler.non_negative(&self.size);
        let mut cut = 0.0;
        if let (Some(capacity), OversizePolicy::Reject) =
            (buffer.capacity(), buffer.oversize_policy())
        {
            if amount > capacity {
                log::debug!(
                    "[{}] Delivery {} cut to capacity {}",
                    ctx.time(),
                    amount,
                    capacity
                );
                cut = amount - capacity;
                amount = capacity;
            }
        }
        log::trace!("[{}] Delivering {}", ctx.time(), amount);
        self.pending = Some((amount, cut));
        Ok(Await::Put {
            buffer: self.buffer,
            amount,
        })
    }

    fn delivered(&mut self, time: Time) -> Await {
        if let Some((amount, cut)) = self.pending {
            let mut stats = self.stats.get();
            stats.deliveries += 1;
            stats.arrived += amount;
            stats.truncated += cut;
            self.stats.set(stats);
            log::trace!("[{}] Delivered {}", time, amount);
        }
        self.wait()
    }
}

impl Process for ArrivalSource {
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> procsim::Result<Await> {
        match signal {
            Signal::Start | Signal::Interrupted => Ok(self.wait()),
            Signal::Timeout => self.deliver(ctx),
            Signal::Stored => Ok(self.delivered(ctx.time())),
            Signal::Acquired => Err(procsim::Error::UnexpectedSignal {
                process: ctx.id(),
                signal,
            }),
        }
    }
}
