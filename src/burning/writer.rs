//! Writer contract and the process-backed writer
//!
//! A writer drives one external writing process for one session. It is built
//! from a [`WriterConfig`] that already describes every track and where its
//! bytes come from, started once, and reports through a [`WriterSender`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;

use super::{cdrdao, cdrecord};
use crate::core::{AUDIO_FRAME_BYTES, DATA_SECTOR_BYTES, ToolPaths, WritingApp};
use crate::job::{JobError, ProcessSlot, Result, Severity, WriterEvent, WriterSender};

/// Where a track's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSource {
    /// A staged buffer file
    File(PathBuf),
    /// The writer's standard input
    Stdin,
    /// A named pipe fed by the job
    Pipe(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// ISO9660 data; `xa` selects mode 2 form 1 for a second session
    Data { xa: bool },
    Audio {
        copy: bool,
        preemphasis: bool,
        /// Pregap in frames
        pregap: u32,
    },
}

/// One track of a session as the writer sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInput {
    pub kind: TrackKind,
    pub source: TrackSource,
    /// Sectors for data, frames for audio
    pub length: u64,
    /// Shown in "Writing track t of n (name)"
    pub name: String,
}

impl TrackInput {
    pub fn is_data(&self) -> bool {
        matches!(self.kind, TrackKind::Data { .. })
    }

    pub fn byte_size(&self) -> u64 {
        match self.kind {
            TrackKind::Data { .. } => self.length * DATA_SECTOR_BYTES,
            TrackKind::Audio { .. } => self.length * AUDIO_FRAME_BYTES,
        }
    }
}

/// Tracks of one session plus its position in the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    pub tracks: Vec<TrackInput>,
    /// 0-based index of this session
    pub index: usize,
    /// Number of sessions written by the run
    pub count: usize,
}

impl SessionLayout {
    /// Another session follows, so the disc must stay open
    pub fn is_multisession(&self) -> bool {
        self.index + 1 < self.count
    }

    /// This session is appended to a disc written earlier in the run
    pub fn is_appended(&self) -> bool {
        self.index > 0
    }

    pub fn is_two_session(&self) -> bool {
        self.count > 1
    }

    /// Exact number of bytes the writer reads from its standard input
    pub fn stdin_bytes(&self) -> u64 {
        self.tracks
            .iter()
            .filter(|t| t.source == TrackSource::Stdin)
            .map(TrackInput::byte_size)
            .sum()
    }

    pub fn uses_stdin(&self) -> bool {
        self.tracks.iter().any(|t| t.source == TrackSource::Stdin)
    }

    pub fn total_bytes(&self) -> u64 {
        self.tracks.iter().map(TrackInput::byte_size).sum()
    }
}

/// How the writer receives its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterInput {
    /// Every track is a staged file
    Files,
    /// Bytes are streamed; the writer is told the exact size up front
    Stream { size_bytes: u64 },
}

/// Everything needed to build the writer for one session
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Resolved once per run; never `Auto`
    pub app: WritingApp,
    pub device: String,
    /// 0 lets the writer pick
    pub speed: u32,
    pub simulate: bool,
    pub burnfree: bool,
    pub dao: bool,
    pub session: SessionLayout,
    pub input: WriterInput,
    /// Track description file for cdrdao
    pub toc_file: Option<PathBuf>,
}

impl WriterConfig {
    pub fn is_streaming(&self) -> bool {
        matches!(self.input, WriterInput::Stream { .. })
    }
}

/// One session's writing process
pub trait Writer: Send {
    fn start(&mut self) -> Result<()>;

    /// Stop writing. Safe before `start` and after the process has exited.
    fn cancel(&mut self);

    /// Standard input of the process while it is open
    fn input(&mut self) -> Option<&mut (dyn AsyncWrite + Send + Unpin)>;

    /// Close standard input so the process sees end of stream
    fn close_input(&mut self);
}

/// Builds a fresh writer for each session
pub trait WriterFactory: Send {
    fn create(&mut self, config: WriterConfig, events: WriterSender) -> Result<Box<dyn Writer>>;
}

/// Turns one line of process output into writer events
pub trait ProgressParser: Send {
    fn parse_line(&mut self, line: &str) -> Vec<WriterEvent>;
}

/// Writer factory backed by cdrecord and cdrdao
#[derive(Debug, Clone)]
pub struct ProcessWriterFactory {
    tools: ToolPaths,
}

impl ProcessWriterFactory {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }
}

impl WriterFactory for ProcessWriterFactory {
    fn create(&mut self, config: WriterConfig, events: WriterSender) -> Result<Box<dyn Writer>> {
        let (program, args, parser): (PathBuf, Vec<String>, Box<dyn ProgressParser>) = match config.app {
            WritingApp::Cdrdao => {
                let toc = config.toc_file.as_ref().ok_or_else(|| {
                    JobError::WriterFailure("cdrdao needs a toc file".to_string())
                })?;
                (
                    ToolPaths::resolve(&self.tools.cdrdao, "cdrdao")?,
                    cdrdao::arguments(&config, toc),
                    Box::new(cdrdao::CdrdaoProgress::new(&config.session)),
                )
            }
            WritingApp::Auto | WritingApp::Cdrecord => (
                ToolPaths::resolve(&self.tools.cdrecord, "cdrecord")?,
                cdrecord::arguments(&config),
                Box::new(cdrecord::CdrecordProgress::new(&config.session)),
            ),
        };

        Ok(Box::new(ProcessWriter::new(
            program,
            args,
            config.session.uses_stdin(),
            parser,
            events,
        )))
    }
}

/// A writer running one external process
pub struct ProcessWriter {
    program: PathBuf,
    args: Vec<String>,
    uses_stdin: bool,
    parser: Option<Box<dyn ProgressParser>>,
    events: WriterSender,
    stdin: Option<ChildStdin>,
    process: ProcessSlot,
    canceled: Arc<AtomicBool>,
}

impl ProcessWriter {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        uses_stdin: bool,
        parser: Box<dyn ProgressParser>,
        events: WriterSender,
    ) -> Self {
        Self {
            program,
            args,
            uses_stdin,
            parser: Some(parser),
            events,
            stdin: None,
            process: ProcessSlot::new(),
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl Writer for ProcessWriter {
    fn start(&mut self) -> Result<()> {
        let mut parser = self
            .parser
            .take()
            .ok_or_else(|| JobError::WriterFailure("writer was already started".to_string()))?;
        let name = self.name();

        log::info!("Starting {} {}", name, self.args.join(" "));

        let stdin = if self.uses_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::WriterFailure(format!("Failed to execute {}: {}", name, e)))?;

        self.process.register(child.id());
        self.stdin = child.stdin.take();

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let events = self.events.clone();
        let canceled = self.canceled.clone();
        let process = self.process.clone();

        tokio::spawn(async move {
            let mut last_line = None;
            while let Some(line) = line_rx.recv().await {
                log::debug!("{}: {}", name, line);
                for event in parser.parse_line(&line) {
                    events.send(event);
                }
                last_line = Some(line);
            }

            let status = child.wait().await;
            process.clear();

            if canceled.load(Ordering::SeqCst) {
                log::debug!("{} stopped after cancel", name);
                return;
            }

            match status {
                Ok(status) if status.success() => {
                    log::info!("{} finished successfully", name);
                    events.send(WriterEvent::Finished(true));
                }
                Ok(status) => {
                    log::error!("{} exited with {}", name, status);
                    if let Some(line) = last_line {
                        events.send(WriterEvent::Info(line, Severity::Warning));
                    }
                    events.send(WriterEvent::Finished(false));
                }
                Err(e) => {
                    log::error!("Error waiting for {}: {}", name, e);
                    events.send(WriterEvent::Finished(false));
                }
            }
        });

        Ok(())
    }

    fn cancel(&mut self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.stdin = None;
        self.process.kill();
    }

    fn input(&mut self) -> Option<&mut (dyn AsyncWrite + Send + Unpin)> {
        self.stdin
            .as_mut()
            .map(|stdin| stdin as &mut (dyn AsyncWrite + Send + Unpin))
    }

    fn close_input(&mut self) {
        if self.stdin.take().is_some() {
            log::debug!("Closed standard input of {}", self.name());
        }
    }
}

/// Forward output lines, treating `\r` as a line break too since the
/// writers redraw their progress line in place
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, lines: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut current = Vec::new();

    loop {
        let consumed = match reader.fill_buf().await {
            Ok([]) | Err(_) => break,
            Ok(available) => {
                for &byte in available {
                    if byte == b'\n' || byte == b'\r' {
                        send_line(&mut current, &lines);
                    } else {
                        current.push(byte);
                    }
                }
                available.len()
            }
        };
        reader.consume(consumed);
    }

    send_line(&mut current, &lines);
}

fn send_line(current: &mut Vec<u8>, lines: &mpsc::UnboundedSender<String>) {
    let line = String::from_utf8_lossy(current).trim().to_string();
    current.clear();
    if !line.is_empty() {
        let _ = lines.send(line);
    }
}

/// Megabytes per track as the writers count them
pub(crate) fn track_megabytes(session: &SessionLayout) -> Vec<f64> {
    session
        .tracks
        .iter()
        .map(|t| t.byte_size() as f64 / (1024.0 * 1024.0))
        .collect()
}

/// Percent of `part` in `whole`, clamped to 0..=100
pub(crate) fn percent_of(part: f64, whole: f64) -> u8 {
    if whole <= 0.0 {
        return 0;
    }
    (part / whole * 100.0).clamp(0.0, 100.0) as u8
}
