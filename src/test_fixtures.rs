//! Test fixtures for job and writer tests
//!
//! Scripted stand-ins for the producers, the writer factory and the drive.
//! All of them append to one shared call log so tests can assert the order
//! in which the job drove them.

#![cfg(test)]

use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::io::AsyncWrite;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use crate::burning::{
    Drive, SessionLayout, TrackInput, TrackKind, TrackSource, Writer, WriterConfig, WriterFactory,
};
use crate::job::{
    ImageProducer, JobError, Producer, ProducerEvent, ProducerSender, Result, WriterEvent,
    WriterSender,
};

/// Shared, ordered record of every call made to a fake
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &CallLog, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

/// Position of the first matching entry, panicking with the log when missing
pub fn position(log: &CallLog, entry: &str) -> usize {
    let entries = calls(log);
    entries
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{} not in call log {:?}", entry, entries))
}

// ---------------------------------------------------------------------------
// Track helpers
// ---------------------------------------------------------------------------

pub fn data_input(source: TrackSource, sectors: u64, xa: bool) -> TrackInput {
    TrackInput {
        kind: TrackKind::Data { xa },
        source,
        length: sectors,
        name: "ISO9660 data".to_string(),
    }
}

pub fn audio_input(source: TrackSource, frames: u64) -> TrackInput {
    TrackInput {
        kind: TrackKind::Audio {
            copy: true,
            preemphasis: false,
            pregap: 150,
        },
        source,
        length: frames,
        name: "track".to_string(),
    }
}

pub fn session_layout(tracks: Vec<TrackInput>, index: usize, count: usize) -> SessionLayout {
    SessionLayout {
        tracks,
        index,
        count,
    }
}

/// Write `samples` stereo sample pairs of silence as a CD audio WAV
pub fn write_silent_wav(path: &Path, samples: u32) {
    let mut writer = hound::WavWriter::create(path, crate::audio::wave::cd_audio_spec()).unwrap();
    for _ in 0..samples * 2 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Write an executable shell script standing in for an external tool
#[cfg(unix)]
pub fn shell_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// One scripted producer action
#[derive(Debug, Clone)]
pub enum Step {
    /// Post a chunk and wait for `resume()`
    Chunk(Vec<u8>),
    Percent(u8),
    SubPercent(u8),
    Track(usize, usize),
    Finish(bool),
    /// Go quiet until canceled
    Hold,
}

/// Producer that replays a script of events
pub struct ScriptedProducer {
    name: &'static str,
    log: CallLog,
    script: Vec<Step>,
    /// None leaves the size calculation unanswered
    size: Option<std::result::Result<u64, String>>,
    queue: VecDeque<Step>,
    events: Option<ProducerSender>,
    resumes: Arc<AtomicUsize>,
}

impl ScriptedProducer {
    pub fn new(name: &'static str, log: &CallLog, script: Vec<Step>) -> Self {
        Self {
            name,
            log: log.clone(),
            script,
            size: Some(Ok(0)),
            queue: VecDeque::new(),
            events: None,
            resumes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Result reported by `calculate_size`
    pub fn with_size(mut self, size: std::result::Result<u64, String>) -> Self {
        self.size = Some(size);
        self
    }

    /// Never answer `calculate_size`
    pub fn holding_size(mut self) -> Self {
        self.size = None;
        self
    }

    /// Counter of `resume()` calls, readable after the producer was boxed
    pub fn resume_counter(&self) -> Arc<AtomicUsize> {
        self.resumes.clone()
    }

    /// Send steps until a chunk is outstanding or the script runs dry
    fn pump(&mut self) {
        let Some(events) = self.events.clone() else {
            return;
        };
        while let Some(step) = self.queue.pop_front() {
            match step {
                Step::Chunk(bytes) => {
                    events.send(ProducerEvent::Data(bytes));
                    return;
                }
                Step::Percent(p) => {
                    events.send(ProducerEvent::Percent(p));
                }
                Step::SubPercent(p) => {
                    events.send(ProducerEvent::SubPercent(p));
                }
                Step::Track(index, total) => {
                    events.send(ProducerEvent::NextTrack { index, total });
                }
                Step::Finish(ok) => {
                    events.send(ProducerEvent::Finished(ok));
                }
                Step::Hold => {
                    self.queue.clear();
                    return;
                }
            }
        }
    }
}

impl Producer for ScriptedProducer {
    fn start(&mut self, events: ProducerSender) {
        record(&self.log, format!("{}.start", self.name));
        self.queue = self.script.iter().cloned().collect();
        self.events = Some(events);
        self.pump();
    }

    fn resume(&mut self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.pump();
    }

    fn cancel(&mut self) {
        record(&self.log, format!("{}.cancel", self.name));
        self.queue.clear();
        self.events = None;
    }
}

impl ImageProducer for ScriptedProducer {
    fn calculate_size(&mut self, events: ProducerSender) {
        record(&self.log, format!("{}.size", self.name));
        if let Some(size) = self.size.clone() {
            events.send(ProducerEvent::SizeCalculated(size));
        }
    }
}

/// The image script used by most scenarios: `chunks` chunks of one sector
pub fn image_script(chunks: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for i in 0..chunks {
        steps.push(Step::Chunk(vec![0xD1; 2048]));
        steps.push(Step::Percent(((i + 1) * 100 / chunks) as u8));
    }
    steps.push(Step::Finish(true));
    steps
}

/// Audio script: one chunk of `bytes` per track
pub fn audio_script(tracks: usize, bytes: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for i in 0..tracks {
        steps.push(Step::Track(i + 1, tracks));
        steps.push(Step::Chunk(vec![0xA1; bytes]));
        steps.push(Step::Percent(((i + 1) * 100 / tracks) as u8));
    }
    steps.push(Step::Finish(true));
    steps
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// AsyncWrite sink whose bytes stay readable after the writer is gone
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    /// Accept nothing, like a pipe whose reader stopped reading
    stalled: bool,
}

impl SharedBuffer {
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        if self.stalled {
            return Poll::Pending;
        }
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// How a fake writer ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterScript {
    Succeed,
    Fail,
    /// Keep running until canceled
    Hold,
    /// Stop reading stdin but keep running
    Stall,
    /// Exit with an error while stdin is still being fed
    DieWhileFed,
}

/// What the fake writers saw, shared with the test
#[derive(Debug, Clone, Default)]
pub struct WriterRecord {
    pub configs: Arc<Mutex<Vec<WriterConfig>>>,
    /// Standard input of every session, in session order
    pub stdin: Arc<Mutex<Vec<SharedBuffer>>>,
    /// Bytes read from each named pipe, in track order
    pub pipe_bytes: Arc<Mutex<Vec<usize>>>,
}

impl WriterRecord {
    pub fn config(&self, session: usize) -> WriterConfig {
        self.configs.lock().unwrap()[session].clone()
    }

    pub fn stdin(&self, session: usize) -> Vec<u8> {
        self.stdin.lock().unwrap()[session].contents()
    }
}

pub struct FakeWriterFactory {
    log: CallLog,
    scripts: VecDeque<WriterScript>,
    record: WriterRecord,
}

impl FakeWriterFactory {
    /// One script per session; missing ones succeed
    pub fn new(log: &CallLog, scripts: Vec<WriterScript>) -> Self {
        Self {
            log: log.clone(),
            scripts: scripts.into(),
            record: WriterRecord::default(),
        }
    }

    pub fn record(&self) -> WriterRecord {
        self.record.clone()
    }
}

impl WriterFactory for FakeWriterFactory {
    fn create(&mut self, config: WriterConfig, events: WriterSender) -> Result<Box<dyn Writer>> {
        let session = config.session.index;
        record(&self.log, format!("writer.create:{}", session));

        let script = self.scripts.pop_front().unwrap_or(WriterScript::Succeed);
        let stdin = match script {
            WriterScript::Stall | WriterScript::DieWhileFed => SharedBuffer::stalled(),
            _ => SharedBuffer::default(),
        };
        self.record.configs.lock().unwrap().push(config.clone());
        self.record.stdin.lock().unwrap().push(stdin.clone());

        let pipes = config
            .session
            .tracks
            .iter()
            .filter_map(|t| match &t.source {
                TrackSource::Pipe(path) => Some(path.clone()),
                _ => None,
            })
            .collect();

        Ok(Box::new(FakeWriter {
            session,
            log: self.log.clone(),
            events,
            script,
            reads_stdin: config.is_streaming() && config.session.uses_stdin(),
            stdin: Some(stdin),
            input_closed: Arc::new(Notify::new()),
            pipes,
            pipe_bytes: self.record.pipe_bytes.clone(),
            task: None,
        }))
    }
}

pub struct FakeWriter {
    session: usize,
    log: CallLog,
    events: WriterSender,
    script: WriterScript,
    reads_stdin: bool,
    stdin: Option<SharedBuffer>,
    input_closed: Arc<Notify>,
    pipes: Vec<PathBuf>,
    pipe_bytes: Arc<Mutex<Vec<usize>>>,
    task: Option<JoinHandle<()>>,
}

/// Read a fifo to its end on a plain thread, so a reader that never sees a
/// writer cannot hold up the test runtime
fn drain_pipe(path: PathBuf) -> oneshot::Receiver<usize> {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let read = std::fs::File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .unwrap_or(0);
        let _ = tx.send(read);
    });
    rx
}

impl Writer for FakeWriter {
    fn start(&mut self) -> Result<()> {
        record(&self.log, format!("writer.start:{}", self.session));

        let events = self.events.clone();
        let script = self.script;
        let reads_stdin = self.reads_stdin;
        let input_closed = self.input_closed.clone();
        let pipes = self.pipes.clone();
        let pipe_bytes = self.pipe_bytes.clone();
        let log = self.log.clone();
        let session = self.session;

        self.task = Some(tokio::spawn(async move {
            events.send(WriterEvent::Percent(0));
            events.send(WriterEvent::NextTrack { current: 1, total: 1 });

            for pipe in pipes {
                let read = drain_pipe(pipe).await.unwrap_or(0);
                pipe_bytes.lock().unwrap().push(read);
            }
            if reads_stdin && script != WriterScript::DieWhileFed {
                input_closed.notified().await;
            }

            match script {
                WriterScript::Hold | WriterScript::Stall => futures::future::pending::<()>().await,
                WriterScript::Succeed => {
                    events.send(WriterEvent::Percent(50));
                    events.send(WriterEvent::Percent(100));
                    record(&log, format!("writer.finished:{}", session));
                    events.send(WriterEvent::Finished(true));
                }
                WriterScript::Fail | WriterScript::DieWhileFed => {
                    events.send(WriterEvent::Percent(50));
                    record(&log, format!("writer.failed:{}", session));
                    events.send(WriterEvent::Finished(false));
                }
            }
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        record(&self.log, format!("writer.cancel:{}", self.session));
        self.stdin = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn input(&mut self) -> Option<&mut (dyn AsyncWrite + Send + Unpin)> {
        self.stdin
            .as_mut()
            .map(|s| s as &mut (dyn AsyncWrite + Send + Unpin))
    }

    fn close_input(&mut self) {
        if self.stdin.take().is_some() {
            record(&self.log, format!("writer.close_input:{}", self.session));
            self.input_closed.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// Drive
// ---------------------------------------------------------------------------

/// Result of a fake drive operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaScript {
    Ready,
    Fail,
    /// Never resolves
    Pending,
}

impl MediaScript {
    fn future(self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            match self {
                MediaScript::Ready => Ok(()),
                MediaScript::Fail => Err(JobError::MediaState("no empty medium".to_string())),
                MediaScript::Pending => futures::future::pending().await,
            }
        })
    }
}

pub struct FakeDrive {
    log: CallLog,
    wait: MediaScript,
    reload: MediaScript,
}

impl FakeDrive {
    pub fn new(log: &CallLog, wait: MediaScript, reload: MediaScript) -> Self {
        Self {
            log: log.clone(),
            wait,
            reload,
        }
    }
}

impl Drive for FakeDrive {
    fn wait_for_empty_disc(&self) -> BoxFuture<'static, Result<()>> {
        record(&self.log, "drive.wait_empty");
        self.wait.future()
    }

    fn reload(&self) -> BoxFuture<'static, Result<()>> {
        record(&self.log, "drive.reload");
        self.reload.future()
    }
}
