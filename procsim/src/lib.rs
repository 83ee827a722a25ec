#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

//! Process-oriented discrete-event simulation engine.
//!
//! The engine advances a virtual clock through a queue of timed events. Each event resumes a
//! [`Process`], which runs until it asks to be suspended again by returning an [`Await`]:
//! a timeout, or a blocking `get`/`put` on a shared quantity [`Buffer`]. A suspended process can
//! be interrupted by another process or by the client, in which case its pending suspension is
//! cancelled and it is resumed with [`Signal::Interrupted`].
//!
//! # Examples
//!
//! ```
//! # use procsim::{Await, BufferOptions, Context, Signal, Simulation};
//! # fn main() -> procsim::Result<()> {
//! let mut sim = Simulation::default();
//! let tank = sim.add_buffer(BufferOptions::bounded(5.0))?;
//! let mut filled = 0;
//! sim.add_process(move |_: &mut Context<'_>, signal: Signal| -> procsim::Result<Await> {
//!     Ok(match signal {
//!         Signal::Start | Signal::Timeout => Await::Put { buffer: tank, amount: 2.0 },
//!         Signal::Stored => {
//!             filled += 1;
//!             Await::Timeout(1.0)
//!         }
//!         _ => Await::Done,
//!     })
//! });
//! sim.run(10.0)?;
//! assert_eq!(sim.buffer(tank)?.level(), 4.0);
//! assert_eq!(sim.buffer(tank)?.waiting_putters(), 1);
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::rc::Rc;

/// Virtual simulation time in hours.
pub type Time = f64;

/// Simulation clock.
pub type Clock = Rc<Cell<Time>>;

/// Tolerance used when comparing quantities against buffer levels and capacities.
pub const EPSILON: f64 = 1e-9;

pub use buffer::{Buffer, BufferId, BufferOptions, LevelSample, OversizePolicy};
pub use error::{Error, Result};
pub use process::{Await, Context, Process, ProcessId, ProcessState, Signal, Wait};
pub use scheduler::{ClockRef, EventEntry, Scheduler};
pub use simulation::{Simulation, TraceEntry};

mod buffer;
mod error;
mod process;
mod scheduler;
mod simulation;
