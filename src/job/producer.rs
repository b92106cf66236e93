//! Producer contract
//!
//! A producer turns some source (a data tree, a list of audio files) into a
//! byte stream. It never writes anywhere itself: every chunk is posted to the
//! job as [`ProducerEvent::Data`] and the producer then waits until the job
//! calls [`Producer::resume`]. At most one chunk per producer is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::events::{ProducerEvent, ProducerSender};

/// Operations shared by the image and audio producers
pub trait Producer: Send {
    /// Begin producing. Events go to `events` until `Finished` has been sent.
    fn start(&mut self, events: ProducerSender);

    /// The last chunk has been consumed; send the next one
    fn resume(&mut self);

    /// Stop producing. Safe to call at any time, including before `start`.
    fn cancel(&mut self);
}

/// Producer of the ISO9660 image
pub trait ImageProducer: Producer {
    /// Compute the image size in sectors and post `SizeCalculated`
    fn calculate_size(&mut self, events: ProducerSender);
}

/// Pid of a running child process that can be killed from any thread
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    pid: Arc<Mutex<Option<u32>>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: Option<u32>) {
        if let Ok(mut slot) = self.pid.lock() {
            *slot = pid;
        }
    }

    pub fn clear(&self) {
        self.register(None);
    }

    /// Kill the registered process, if any
    pub fn kill(&self) {
        let pid = self.pid.lock().ok().and_then(|mut slot| slot.take());
        if let Some(pid) = pid {
            log::debug!("Killing process {}", pid);
            #[cfg(unix)]
            unsafe {
                // SIGKILL for immediate termination
                libc::kill(pid as i32, libc::SIGKILL);
            }
            #[cfg(not(unix))]
            {
                // tokio's kill_on_drop covers the child once its handle goes away
                let _ = pid;
            }
        }
    }
}

#[derive(Debug, Default)]
struct GateInner {
    resume: Notify,
    canceled: AtomicBool,
    process: ProcessSlot,
}

/// The resume handshake seen from inside a producer task
///
/// The producer's task calls [`ChunkGate::send_chunk`]; the job's
/// `resume()`/`cancel()` calls land on the same gate through the producer.
#[derive(Debug, Clone, Default)]
pub struct ChunkGate {
    inner: Arc<GateInner>,
}

impl ChunkGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&self) {
        self.inner.resume.notify_one();
    }

    /// Mark canceled, wake a waiting producer and kill its child process
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
        self.inner.resume.notify_one();
        self.inner.process.kill();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    pub fn process(&self) -> &ProcessSlot {
        &self.inner.process
    }

    /// Post one chunk and wait for the job to consume it.
    /// Returns false when the producer should stop.
    pub async fn send_chunk(&self, events: &ProducerSender, chunk: Vec<u8>) -> bool {
        if self.is_canceled() || !events.send(ProducerEvent::Data(chunk)) {
            return false;
        }
        self.inner.resume.notified().await;
        !self.is_canceled()
    }
}
