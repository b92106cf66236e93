//! Job module - the mixed-mode writing run and its contracts
//!
//! Nothing in here spawns external programs. Producers, writers and the
//! drive are trait objects supplied by the caller (see `burning::workflow`
//! for the real ones and `test_fixtures` for scripted ones).

mod artifacts;
mod error;
mod events;
mod orchestrator;
mod producer;
mod progress;


pub use error::{JobError, Result};
pub use events::{JobEvent, ProducerEvent, ProducerSender, Severity, WriterEvent, WriterSender};
#[cfg(test)]
pub use events::{ComponentEvent, ProducerKind};
pub use orchestrator::{JobOutcome, JobParts, MixedJob};
pub use producer::{ChunkGate, ImageProducer, ProcessSlot, Producer};
