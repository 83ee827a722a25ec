//! Fixtures shared by the tests of the simulation crates.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::cast_precision_loss
)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use procsim::{Await, Buffer, Context, Process, ProcessId, Signal, Time, EPSILON};
use rand::distributions::Distribution;

/// Signals received by a process, with the times they were received at.
pub type SignalLog = Rc<RefCell<Vec<(Time, Signal)>>>;

/// A process that issues a fixed list of requests in order, regardless of the signals it
/// receives, and finishes once the list is exhausted.
///
/// Every received signal is appended to a shared log that can be inspected after the run.
pub struct Script {
    requests: std::vec::IntoIter<Await>,
    log: SignalLog,
}

impl Script {
    /// Constructs a script issuing `requests`.
    #[must_use]
    pub fn new(requests: Vec<Await>) -> Self {
        Self {
            requests: requests.into_iter(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns a handle to the log of received signals.
    #[must_use]
    pub fn log(&self) -> SignalLog {
        Rc::clone(&self.log)
    }
}

impl Process for Script {
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> procsim::Result<Await> {
        self.log.borrow_mut().push((ctx.time(), signal));
        Ok(self.requests.next().unwrap_or(Await::Done))
    }
}

/// A process that waits for `delay` and then interrupts `target`, once.
///
/// The outcome of the interrupt is stored and can be read with [`Interrupter::outcome`].
pub struct Interrupter {
    target: ProcessId,
    delay: Time,
    outcome: Rc<Cell<Option<bool>>>,
}

impl Interrupter {
    /// Constructs an interrupter of `target` firing after `delay`.
    #[must_use]
    pub fn new(target: ProcessId, delay: Time) -> Self {
        Self {
            target,
            delay,
            outcome: Rc::new(Cell::new(None)),
        }
    }

    /// Returns a handle to the outcome: `None` before firing, and afterwards whether the
    /// interrupt was delivered.
    #[must_use]
    pub fn outcome(&self) -> Rc<Cell<Option<bool>>> {
        Rc::clone(&self.outcome)
    }
}

impl Process for Interrupter {
    fn resume(&mut self, ctx: &mut Context<'_>, signal: Signal) -> procsim::Result<Await> {
        match signal {
            Signal::Start => Ok(Await::Timeout(self.delay)),
            _ => {
                self.outcome.set(Some(ctx.interrupt(self.target)?));
                Ok(Await::Done)
            }
        }
    }
}

/// Checks that every recorded level of `buffer` lies within `[0, capacity]`.
#[must_use]
pub fn levels_within_capacity(buffer: &Buffer) -> bool {
    let capacity = buffer.capacity().unwrap_or(f64::INFINITY);
    buffer
        .history()
        .iter()
        .all(|sample| sample.level >= -EPSILON && sample.level <= capacity + EPSILON)
}

/// Checks that level samples of `buffer` are recorded in non-decreasing time order.
#[must_use]
pub fn history_is_chronological(buffer: &Buffer) -> bool {
    buffer
        .history()
        .windows(2)
        .all(|pair| pair[0].time <= pair[1].time)
}

/// This distribution cycles through a fixed list of values, ignoring the random number
/// generator. Useful to feed predictable, possibly invalid, draws to code under test.
pub struct CyclingDistribution {
    values: Vec<f64>,
    next: Cell<usize>,
}

impl CyclingDistribution {
    /// Constructs a distribution cycling through `values`, which must not be empty.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "no values to cycle through");
        Self {
            values,
            next: Cell::new(0),
        }
    }
}

impl Distribution<f64> for CyclingDistribution {
    fn sample<R: rand::Rng + ?Sized>(&self, _rng: &mut R) -> f64 {
        let idx = self.next.get();
        self.next.set((idx + 1) % self.values.len());
        self.values[idx]
    }
}
