use std::cell::Cell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;

use ordered_float::OrderedFloat;

use crate::{Clock, Error, ProcessId, Result, Signal, Time};

/// Entry type stored in the scheduler: the process to resume, the signal to resume it with,
/// and the time when it is supposed to occur.
///
/// Entries are ordered by time, and then by insertion order, so that events scheduled for the
/// same time are executed first-in-first-out.
#[derive(Debug, Clone, Copy)]
pub struct EventEntry {
    time: Reverse<OrderedFloat<Time>>,
    sequence: Reverse<u64>,
    process: ProcessId,
    signal: Signal,
    token: u64,
}

impl EventEntry {
    /// Time at which the event occurs.
    #[must_use]
    pub fn time(&self) -> Time {
        (self.time.0).0
    }

    /// Process to resume.
    #[must_use]
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Signal delivered to the process.
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Wake token of the process at the time of scheduling.
    /// The event is stale if the process token has changed since.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    fn key(&self) -> (Reverse<OrderedFloat<Time>>, Reverse<u64>) {
        (self.time, self.sequence)
    }
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EventEntry {}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// This struct has only immutable access to the simulation clock exposed.
#[derive(Debug, Clone)]
pub struct ClockRef {
    clock: Clock,
}

impl From<Clock> for ClockRef {
    fn from(clock: Clock) -> Self {
        Self { clock }
    }
}

impl ClockRef {
    /// Return the current simulation time.
    #[must_use]
    pub fn time(&self) -> Time {
        self.clock.get()
    }
}

/// Scheduler is used to keep the current time and information about the upcoming events.
#[derive(Debug)]
pub struct Scheduler {
    events: BinaryHeap<EventEntry>,
    clock: Clock,
    sequence: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            events: BinaryHeap::new(),
            clock: Rc::new(Cell::new(0.0)),
            sequence: 0,
        }
    }
}

impl Scheduler {
    /// Schedules `signal` to be delivered to `process` at `self.time() + delay`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDelay`] if `delay` is negative or not finite.
    pub fn schedule(
        &mut self,
        delay: Time,
        process: ProcessId,
        signal: Signal,
        token: u64,
    ) -> Result<()> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(Error::InvalidDelay { process, delay });
        }
        let time = self.time() + delay;
        self.events.push(EventEntry {
            time: Reverse(OrderedFloat(time)),
            sequence: Reverse(self.sequence),
            process,
            signal,
            token,
        });
        self.sequence += 1;
        Ok(())
    }

    /// Schedules `signal` to be delivered to `process` at `self.time()`, after any event already
    /// scheduled for the current time.
    pub fn schedule_immediately(&mut self, process: ProcessId, signal: Signal, token: u64) {
        let time = self.time();
        self.events.push(EventEntry {
            time: Reverse(OrderedFloat(time)),
            sequence: Reverse(self.sequence),
            process,
            signal,
            token,
        });
        self.sequence += 1;
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> Time {
        self.clock.get()
    }

    /// Returns a structure with immutable access to the simulation time.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        ClockRef {
            clock: Rc::clone(&self.clock),
        }
    }

    /// Time of the next scheduled event, if any.
    #[must_use]
    pub fn peek_time(&self) -> Option<Time> {
        self.events.peek().map(EventEntry::time)
    }

    /// Number of scheduled events, including stale ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Checks if there are no events left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes and returns the next scheduled event or `None` if none are left.
    /// The clock is advanced to the time of the returned event.
    pub fn pop(&mut self) -> Option<EventEntry> {
        self.events.pop().map(|e| {
            self.clock.replace(e.time());
            e
        })
    }

    /// Returns the next scheduled event without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&EventEntry> {
        self.events.peek()
    }

    /// Drops the next scheduled event without moving the clock.
    pub(crate) fn discard(&mut self) {
        self.events.pop();
    }

    /// Moves the clock forward to `time`. Never moves it backwards.
    pub(crate) fn advance_to(&mut self, time: Time) {
        if time > self.clock.get() {
            self.clock.replace(time);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(time: Time, sequence: u64) -> EventEntry {
        EventEntry {
            time: Reverse(OrderedFloat(time)),
            sequence: Reverse(sequence),
            process: ProcessId::from(0),
            signal: Signal::Timeout,
            token: 0,
        }
    }

    #[test]
    fn test_event_entry_cmp() {
        assert_eq!(entry(1.0, 0), entry(1.0, 0));
        assert_eq!(entry(0.0, 5).cmp(&entry(1.0, 0)), Ordering::Greater);
        assert_eq!(entry(2.0, 0).cmp(&entry(1.0, 5)), Ordering::Less);
        assert_eq!(entry(1.0, 0).cmp(&entry(1.0, 1)), Ordering::Greater);
    }

    #[test]
    fn test_scheduler() {
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.time(), 0.0);
        assert!(scheduler.is_empty());

        let a = ProcessId::from(0);
        let b = ProcessId::from(1);

        scheduler.schedule(1.0, a, Signal::Timeout, 3).unwrap();
        scheduler.schedule(0.0, b, Signal::Start, 0).unwrap();
        scheduler.schedule(2.0, b, Signal::Timeout, 1).unwrap();
        assert_eq!(scheduler.len(), 3);
        assert_eq!(scheduler.peek_time(), Some(0.0));

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.process(), b);
        assert_eq!(entry.signal(), Signal::Start);
        assert_eq!(scheduler.time(), 0.0);

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.process(), a);
        assert_eq!(entry.token(), 3);
        assert_eq!(scheduler.time(), 1.0);

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.process(), b);
        assert_eq!(entry.time(), 2.0);
        assert_eq!(scheduler.time(), 2.0);

        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn test_same_time_is_fifo() {
        let mut scheduler = Scheduler::default();
        for id in 0..5 {
            scheduler.schedule(1.0, ProcessId::from(id), Signal::Timeout, 0).unwrap();
        }
        scheduler.pop().unwrap();
        scheduler.schedule_immediately(ProcessId::from(10), Signal::Interrupted, 0);
        let order: Vec<usize> = std::iter::from_fn(|| scheduler.pop())
            .map(|e| e.process().into())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4, 10]);
    }

    #[test]
    fn test_invalid_delay() {
        let mut scheduler = Scheduler::default();
        let process = ProcessId::from(0);
        assert_eq!(
            scheduler.schedule(-1.0, process, Signal::Timeout, 0),
            Err(Error::InvalidDelay {
                process,
                delay: -1.0
            })
        );
        assert!(scheduler.schedule(f64::NAN, process, Signal::Timeout, 0).is_err());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_clock_ref() {
        let mut scheduler = Scheduler::default();
        let clock = scheduler.clock();
        scheduler.advance_to(3.5);
        assert_eq!(clock.time(), 3.5);
        scheduler.advance_to(1.0);
        assert_eq!(clock.time(), 3.5);
    }
}
