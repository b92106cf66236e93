//! Events flowing into and out of a mixed-mode job
//!
//! Producers, writers and the drive never call into the job directly. They
//! post [`ComponentEvent`]s on the job's channel and the job reacts inside its
//! single control loop. Everything the UI side needs is published as
//! [`JobEvent`]s.

use tokio::sync::mpsc::UnboundedSender;

use super::error::JobError;

/// Severity of an info message shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Status,
    Process,
}

/// Signals published by the job for the UI/progress collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started,
    NewTask(String),
    NewSubTask(String),
    InfoMessage(String, Severity),
    /// Overall progress of the run, never decreasing
    Percent(u8),
    SubPercent(u8),
    /// Fill level of the writer's device buffer
    BufferStatus(u8),
    /// Current writing speed in kB/s
    WritingSpeed(u32),
    Canceled,
    Finished(bool),
}

/// Events emitted by the image and audio producers
#[derive(Debug)]
pub enum ProducerEvent {
    /// Result of a size calculation, in 2048-byte sectors
    SizeCalculated(Result<u64, String>),
    /// One chunk of produced bytes. The producer waits for `resume()` before sending the next.
    Data(Vec<u8>),
    Percent(u8),
    SubPercent(u8),
    /// 1-based index of the audio track whose bytes follow
    NextTrack { index: usize, total: usize },
    Info(String, Severity),
    Finished(bool),
}

/// Events emitted by a writer process
#[derive(Debug)]
pub enum WriterEvent {
    Percent(u8),
    SubPercent(u8),
    NextTrack { current: usize, total: usize },
    /// Writing speed in kB/s
    Throughput(u32),
    Buffer(u8),
    Info(String, Severity),
    Finished(bool),
}

/// Results of the asynchronous drive operations
#[derive(Debug)]
pub enum MediaEvent {
    EmptyDiscReady(Result<(), JobError>),
    Reloaded(Result<(), JobError>),
}

/// Which producer an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    Image,
    Audio,
}

/// Everything the job's control loop reacts to
#[derive(Debug)]
pub enum ComponentEvent {
    Producer(ProducerKind, ProducerEvent),
    /// Writer events are tagged with the session they belong to so that stale
    /// events of a finished writer can be told apart.
    Writer(usize, WriterEvent),
    Media(MediaEvent),
}

/// Sending half handed to a producer
#[derive(Debug, Clone)]
pub struct ProducerSender {
    kind: ProducerKind,
    tx: UnboundedSender<ComponentEvent>,
}

impl ProducerSender {
    pub fn new(kind: ProducerKind, tx: UnboundedSender<ComponentEvent>) -> Self {
        Self { kind, tx }
    }

    /// Post an event; returns false once the job is gone
    pub fn send(&self, event: ProducerEvent) -> bool {
        self.tx
            .send(ComponentEvent::Producer(self.kind, event))
            .is_ok()
    }
}

/// Sending half handed to a writer
#[derive(Debug, Clone)]
pub struct WriterSender {
    session: usize,
    tx: UnboundedSender<ComponentEvent>,
}

impl WriterSender {
    pub fn new(session: usize, tx: UnboundedSender<ComponentEvent>) -> Self {
        Self { session, tx }
    }

    pub fn send(&self, event: WriterEvent) -> bool {
        self.tx
            .send(ComponentEvent::Writer(self.session, event))
            .is_ok()
    }
}
