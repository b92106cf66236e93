//! Burning module - image creation, writing processes and drive handling
//!
//! Everything that talks to an external program lives here. The job module
//! only sees the traits.

pub mod cd;
pub mod cdrdao;
pub mod cdrecord;
pub mod coordinator;
pub mod iso;
pub mod toc;
pub mod workflow;
pub mod writer;

pub use coordinator::Drive;
pub use workflow::{execute, log_event, prepare_job};
pub use writer::{
    SessionLayout, TrackInput, TrackKind, TrackSource, Writer, WriterConfig, WriterFactory,
    WriterInput,
};
