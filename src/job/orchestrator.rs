//! The mixed-mode job
//!
//! `MixedJob` owns one image producer, one audio producer and, per session,
//! one writer. All of them report through a single channel and the job reacts
//! to one event at a time inside [`MixedJob::run`], so none of its state is
//! shared. Staged runs produce everything into buffer files first and then
//! write; streaming runs start the writer first and feed it directly.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::artifacts::{ArtifactKind, ArtifactSet, ImageBuffer, PipeWriter};
use super::error::{JobError, Result};
use super::events::{
    ComponentEvent, JobEvent, MediaEvent, ProducerEvent, ProducerKind, ProducerSender, Severity,
    WriterEvent, WriterSender,
};
use super::producer::{ImageProducer, Producer};
use super::progress::ProgressModel;
use crate::audio::WaveBuffer;
use crate::burning::{
    Drive, SessionLayout, TrackInput, TrackKind, TrackSource, Writer, WriterConfig, WriterFactory,
    WriterInput, toc,
};
use crate::core::{
    Content, DATA_SECTOR_BYTES, JobPhase, Project, RunState, Settings, TransferMode, WritingApp,
};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Canceled,
    Failed(String),
}

/// Cancellation request shared between the job and its handles
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once cancellation has been requested
    pub async fn canceled(&self) {
        while !self.is_canceled() {
            self.notify.notified().await;
        }
    }
}

/// Lets other tasks cancel a running job
#[derive(Debug, Clone)]
pub struct JobHandle {
    token: Arc<CancelToken>,
}

impl JobHandle {
    /// Request cancellation. Does nothing unless a run is in progress.
    pub fn cancel(&self) {
        log::info!("Cancel requested");
        self.token.cancel();
    }
}

/// The collaborators a job drives
pub struct JobParts {
    pub image: Box<dyn ImageProducer>,
    pub audio: Box<dyn Producer>,
    pub writers: Box<dyn WriterFactory>,
    pub drive: Arc<dyn Drive>,
}

/// Buffer files and pipes of the current run
#[derive(Default)]
struct RunBuffers {
    artifacts: ArtifactSet,
    image: Option<ImageBuffer>,
    image_path: Option<PathBuf>,
    /// Image size in sectors, measured (staged) or calculated (streaming)
    image_sectors: Option<u64>,
    wave: Option<WaveBuffer>,
    track_files: Vec<PathBuf>,
    track_pipes: Vec<PathBuf>,
    pipe: Option<PipeWriter>,
}

impl RunBuffers {
    fn new(dir: &std::path::Path) -> Self {
        Self {
            artifacts: ArtifactSet::new(dir),
            ..Default::default()
        }
    }
}

pub struct MixedJob {
    project: Project,
    settings: Settings,
    image: Box<dyn ImageProducer>,
    audio: Box<dyn Producer>,
    writers: Box<dyn WriterFactory>,
    drive: Arc<dyn Drive>,
    events: UnboundedSender<JobEvent>,
    tx: UnboundedSender<ComponentEvent>,
    rx: UnboundedReceiver<ComponentEvent>,
    /// Events received while a write was in flight
    pending: VecDeque<ComponentEvent>,
    token: Arc<CancelToken>,

    state: RunState,
    progress: ProgressModel,
    app: WritingApp,
    sessions: Vec<Vec<Content>>,
    /// Position of the content being streamed within its session
    content_index: usize,
    /// Track names of the session being written
    session_names: Vec<String>,
    buffers: RunBuffers,
    writer: Option<Box<dyn Writer>>,
    media_task: Option<JoinHandle<()>>,
    outcome: Option<JobOutcome>,
}

impl MixedJob {
    pub fn new(
        project: Project,
        settings: Settings,
        parts: JobParts,
        events: UnboundedSender<JobEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = ProgressModel::new(&project);
        let app = project.writing_app();
        let buffers = RunBuffers::new(&settings.temp_dir);

        Self {
            project,
            settings,
            image: parts.image,
            audio: parts.audio,
            writers: parts.writers,
            drive: parts.drive,
            events,
            tx,
            rx,
            pending: VecDeque::new(),
            token: Arc::new(CancelToken::default()),
            state: RunState::default(),
            progress,
            app,
            sessions: Vec::new(),
            content_index: 0,
            session_names: Vec::new(),
            buffers,
            writer: None,
            media_task: None,
            outcome: None,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            token: self.token.clone(),
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.state.phase
    }

    /// Start a run and drive it to its end
    pub async fn run(&mut self) -> JobOutcome {
        self.prepare_run();
        self.emit(JobEvent::Started);

        if let Err(e) = self.start() {
            self.fail(e);
        }

        loop {
            if let Some(outcome) = self.outcome.take() {
                log::info!("Mixed-mode job ended: {:?}", outcome);
                return outcome;
            }

            if self.token.is_canceled() {
                self.cancel();
                continue;
            }

            let event = match self.pending.pop_front() {
                Some(event) => Some(event),
                None => tokio::select! {
                    _ = self.token.canceled() => continue,
                    event = self.rx.recv() => event,
                },
            };

            let result = match event {
                Some(event) => self.handle_event(event).await,
                None => Err(JobError::WriterFailure("event channel closed".to_string())),
            };
            if let Err(e) = result {
                self.fail(e);
            }
        }
    }

    fn prepare_run(&mut self) {
        self.state.reset();
        self.token.reset();
        self.outcome = None;
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}

        self.progress = ProgressModel::new(&self.project);
        self.app = self.project.writing_app();
        self.sessions = self.project.sessions();
        self.content_index = 0;
        self.session_names.clear();
        self.buffers = RunBuffers::new(&self.settings.temp_dir);
        self.writer = None;
        self.media_task = None;
    }

    fn start(&mut self) -> Result<()> {
        self.project.validate()?;

        log::info!(
            "Starting mixed-mode job: {} data sectors, {} audio tracks, {:?}, {:?}, {:?}",
            self.project.data_length(),
            self.project.audio_tracks.len(),
            self.project.layout,
            self.project.transfer,
            self.app
        );
        log::debug!(
            "Audio share of the run: {:.1}%",
            self.progress.weight().audio() * 100.0
        );

        match self.project.transfer {
            TransferMode::Staged => {
                self.emit(JobEvent::NewTask("Creating image files".to_string()));
                if self.project.has_data() {
                    self.start_image_buffer()
                } else {
                    self.start_audio_buffers();
                    Ok(())
                }
            }
            TransferMode::Streaming => {
                self.emit(JobEvent::NewTask("Preparing write process".to_string()));
                if self.project.has_data() {
                    self.state.set_phase(JobPhase::SizeCalculation);
                    let events = self.producer_sender(ProducerKind::Image);
                    self.image.calculate_size(events);
                    Ok(())
                } else {
                    self.begin_session(0)
                }
            }
        }
    }

    fn start_image_buffer(&mut self) -> Result<()> {
        let (path, file) = self.buffers.artifacts.create_file("image", "iso", true)?;

        let message = format!("Creating ISO image in {}", path.display());
        self.emit(JobEvent::NewSubTask(message.clone()));
        self.emit(JobEvent::InfoMessage(message, Severity::Info));

        self.buffers.image = Some(ImageBuffer::new(path.clone(), file));
        self.buffers.image_path = Some(path);
        self.state.set_phase(JobPhase::ProducingImage);
        self.state.current = Some(Content::Data);

        let events = self.producer_sender(ProducerKind::Image);
        self.image.start(events);
        Ok(())
    }

    fn start_audio_buffers(&mut self) {
        self.state.set_phase(JobPhase::ProducingAudio);
        self.state.current = Some(Content::Audio);

        let events = self.producer_sender(ProducerKind::Audio);
        self.audio.start(events);
    }

    async fn handle_event(&mut self, event: ComponentEvent) -> Result<()> {
        if self.state.is_settled() {
            log::debug!("Ignoring component event after the run settled");
            return Ok(());
        }

        match event {
            ComponentEvent::Producer(kind, event) => self.on_producer(kind, event).await,
            ComponentEvent::Writer(session, event) => self.on_writer(session, event),
            ComponentEvent::Media(event) => self.on_media(event),
        }
    }

    async fn on_producer(&mut self, kind: ProducerKind, event: ProducerEvent) -> Result<()> {
        match event {
            ProducerEvent::SizeCalculated(result) => self.on_size_calculated(result),
            ProducerEvent::Data(chunk) => self.on_data(kind, chunk).await,
            ProducerEvent::Percent(p) => {
                self.on_producer_percent(kind, p);
                Ok(())
            }
            ProducerEvent::SubPercent(p) => {
                // while streaming the writer's figures win
                if self.project.transfer == TransferMode::Staged {
                    self.emit(JobEvent::SubPercent(p));
                }
                Ok(())
            }
            ProducerEvent::NextTrack { index, total } => self.on_next_track(index, total),
            ProducerEvent::Info(message, severity) => {
                self.emit(JobEvent::InfoMessage(message, severity));
                Ok(())
            }
            ProducerEvent::Finished(true) => self.on_producer_finished(kind),
            ProducerEvent::Finished(false) => Err(match kind {
                ProducerKind::Image => {
                    JobError::producer("Image creation", "the image producer reported an error")
                }
                ProducerKind::Audio => {
                    JobError::producer("Audio decoding", "the audio decoder reported an error")
                }
            }),
        }
    }

    fn on_size_calculated(&mut self, result: std::result::Result<u64, String>) -> Result<()> {
        if self.state.phase != JobPhase::SizeCalculation {
            log::debug!("Ignoring size calculation outside of its phase");
            return Ok(());
        }

        let sectors =
            result.map_err(|reason| JobError::producer("Image size calculation", reason))?;
        if sectors == 0 {
            return Err(JobError::producer("Image size calculation", "the image is empty"));
        }

        self.emit(JobEvent::InfoMessage(
            format!(
                "Size calculated: {} ({} bytes)",
                sectors,
                sectors * DATA_SECTOR_BYTES
            ),
            Severity::Info,
        ));
        self.buffers.image_sectors = Some(sectors);
        self.begin_session(0)
    }

    /// Persist or forward one chunk, then let the producer continue.
    /// A cancel that lands while the chunk is in flight ends the run here.
    async fn on_data(&mut self, kind: ProducerKind, chunk: Vec<u8>) -> Result<()> {
        match (self.project.transfer, kind) {
            (TransferMode::Staged, ProducerKind::Image) => {
                self.buffers
                    .image
                    .as_mut()
                    .ok_or_else(|| JobError::producer("Image creation", "the image buffer is not open"))?
                    .write(&chunk)?;
            }
            (TransferMode::Staged, ProducerKind::Audio) => {
                self.buffers
                    .wave
                    .as_mut()
                    .ok_or_else(|| JobError::producer("Audio decoding", "no track buffer is open"))?
                    .write(&chunk)?;
            }
            (TransferMode::Streaming, kind) => self.stream(content_of(kind), &chunk).await?,
        }

        if !self.token.is_canceled() {
            match kind {
                ProducerKind::Image => self.image.resume(),
                ProducerKind::Audio => self.audio.resume(),
            }
        }
        Ok(())
    }

    /// Push a chunk into the writer's standard input or the current track pipe
    async fn stream(&mut self, content: Content, chunk: &[u8]) -> Result<()> {
        let token = self.token.clone();
        let session = self.state.session;

        if self.feeds_stdin(content) {
            let input = self
                .writer
                .as_mut()
                .and_then(|w| w.input())
                .ok_or_else(|| JobError::WriterFailure("the writer's input is closed".to_string()))?;

            match feed(&mut self.rx, &mut self.pending, &token, session, input.write_all(chunk)).await {
                Some(result) => result
                    .map_err(|e| JobError::WriterFailure(format!("Could not feed the writer: {}", e))),
                None => Err(JobError::UserCanceled),
            }
        } else {
            let pipe = self
                .buffers
                .pipe
                .as_mut()
                .ok_or_else(|| JobError::producer("Audio decoding", "no track pipe is open"))?;
            let path = pipe.path().to_path_buf();

            match feed(&mut self.rx, &mut self.pending, &token, session, pipe.write_all(chunk)).await {
                Some(result) => result.map_err(|e| JobError::artifact(path, e)),
                None => Err(JobError::UserCanceled),
            }
        }
    }

    fn on_producer_percent(&mut self, kind: ProducerKind, p: u8) {
        let mapped = match kind {
            ProducerKind::Image => self.progress.image_produced(p),
            ProducerKind::Audio => self.progress.audio_produced(p),
        };

        if let Some(value) = mapped {
            if kind == ProducerKind::Image {
                self.emit(JobEvent::SubPercent(p));
            }
            self.publish_percent(value);
        }
    }

    fn on_next_track(&mut self, index: usize, total: usize) -> Result<()> {
        match self.project.transfer {
            TransferMode::Staged => {
                self.finish_wave()?;

                let title = index
                    .checked_sub(1)
                    .and_then(|i| self.project.audio_tracks.get(i))
                    .map(|t| t.display_name())
                    .unwrap_or_default();
                self.emit(JobEvent::NewSubTask(format!(
                    "Decoding audio track {} of {} ({})",
                    index, total, title
                )));

                let path = self.buffers.artifacts.allocate(
                    &format!("track{:02}", index),
                    "wav",
                    ArtifactKind::RegularFile,
                    true,
                )?;
                self.buffers.wave = Some(WaveBuffer::create(&path)?);
                self.buffers.track_files.push(path);
            }
            TransferMode::Streaming => {
                if self.feeds_stdin(Content::Audio) {
                    return Ok(());
                }

                self.close_pipe();
                let path = index
                    .checked_sub(1)
                    .and_then(|i| self.buffers.track_pipes.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        JobError::producer("Audio decoding", format!("no pipe for track {}", index))
                    })?;
                self.buffers.pipe = Some(PipeWriter::new(path));
            }
        }
        Ok(())
    }

    fn on_producer_finished(&mut self, kind: ProducerKind) -> Result<()> {
        match (self.project.transfer, kind) {
            (TransferMode::Staged, ProducerKind::Image) => {
                if self.state.phase != JobPhase::ProducingImage {
                    return Ok(());
                }
                let buffer = self
                    .buffers
                    .image
                    .take()
                    .ok_or_else(|| JobError::producer("Image creation", "the image buffer is not open"))?;
                let bytes = buffer.finish()?;
                self.buffers.image_sectors = Some(bytes.div_ceil(DATA_SECTOR_BYTES));
                self.emit(JobEvent::InfoMessage(
                    "ISO image successfully created.".to_string(),
                    Severity::Info,
                ));

                if self.project.has_audio() {
                    self.start_audio_buffers();
                    Ok(())
                } else {
                    self.begin_session(0)
                }
            }
            (TransferMode::Staged, ProducerKind::Audio) => {
                if self.state.phase != JobPhase::ProducingAudio {
                    return Ok(());
                }
                self.finish_wave()?;
                self.emit(JobEvent::InfoMessage(
                    "Audio tracks successfully decoded.".to_string(),
                    Severity::Info,
                ));
                self.begin_session(0)
            }
            (TransferMode::Streaming, kind) => {
                self.on_content_streamed(content_of(kind));
                Ok(())
            }
        }
    }

    /// A streaming producer delivered all of its content
    fn on_content_streamed(&mut self, content: Content) {
        log::debug!("{:?} content fully streamed", content);
        self.close_pipe();

        let contents = self.session_contents();
        let stdin_follows = contents
            .iter()
            .skip(self.content_index + 1)
            .any(|c| self.feeds_stdin(*c));
        if !stdin_follows {
            if let Some(writer) = self.writer.as_mut() {
                writer.close_input();
            }
        }

        self.content_index += 1;
        if let Some(next) = contents.get(self.content_index).copied() {
            self.start_streaming(next);
        }
    }

    fn start_streaming(&mut self, content: Content) {
        self.state.current = Some(content);
        match content {
            Content::Data => {
                let events = self.producer_sender(ProducerKind::Image);
                self.image.start(events);
            }
            Content::Audio => {
                let events = self.producer_sender(ProducerKind::Audio);
                self.audio.start(events);
            }
        }
    }

    /// Build and create the writer of a session. The first session waits for
    /// an empty medium before it starts; later ones follow a reload.
    fn begin_session(&mut self, index: usize) -> Result<()> {
        let contents = self
            .sessions
            .get(index)
            .cloned()
            .ok_or_else(|| JobError::InvalidProject(format!("there is no session {}", index + 1)))?;

        self.state.session = index;
        self.content_index = 0;

        let layout = self.session_layout(index, &contents)?;
        let toc_file = match self.app {
            WritingApp::Cdrdao => Some(self.write_toc(&layout)?),
            WritingApp::Auto | WritingApp::Cdrecord => None,
        };
        let input = match self.project.transfer {
            TransferMode::Staged => WriterInput::Files,
            TransferMode::Streaming => WriterInput::Stream {
                size_bytes: layout.stdin_bytes(),
            },
        };
        self.session_names = layout.tracks.iter().map(|t| t.name.clone()).collect();

        let config = WriterConfig {
            app: self.app,
            device: self
                .project
                .writer
                .device
                .clone()
                .unwrap_or_else(|| self.settings.device.clone()),
            speed: self.project.writer.speed.unwrap_or(self.settings.speed),
            simulate: self.project.simulate,
            burnfree: self.settings.burnfree,
            dao: self.project.writer.dao,
            session: layout,
            input,
            toc_file,
        };
        log::info!(
            "Session {} of {}: {} tracks ({} data), {} bytes",
            index + 1,
            self.sessions.len(),
            config.session.tracks.len(),
            config.session.tracks.iter().filter(|t| t.is_data()).count(),
            config.session.total_bytes()
        );
        log::debug!("Session {} writer: {:?}", index + 1, config);

        let writer = self
            .writers
            .create(config, WriterSender::new(index, self.tx.clone()))?;
        self.writer = Some(writer);
        self.emit(JobEvent::NewTask(self.session_task()));

        if index == 0 {
            self.state.set_phase(JobPhase::WaitingForMedia);
            self.emit(JobEvent::NewSubTask("Waiting for an empty medium".to_string()));
            let wait = self.drive.wait_for_empty_disc();
            self.spawn_media(wait, MediaEvent::EmptyDiscReady);
            Ok(())
        } else {
            self.start_writer()
        }
    }

    fn session_layout(&mut self, index: usize, contents: &[Content]) -> Result<SessionLayout> {
        let streaming = self.project.transfer == TransferMode::Streaming;
        let xa = self.sessions.len() > 1;
        let mut tracks = Vec::new();

        for content in contents {
            match content {
                Content::Data => tracks.push(self.data_track_input(streaming, xa)?),
                Content::Audio => {
                    self.buffers.track_pipes.clear();
                    let audio_tracks = self.project.audio_tracks.clone();
                    for (i, track) in audio_tracks.iter().enumerate() {
                        let source = self.audio_source(i, streaming)?;
                        tracks.push(TrackInput {
                            kind: TrackKind::Audio {
                                copy: track.copy_permitted,
                                preemphasis: track.preemphasis,
                                pregap: track.pregap,
                            },
                            source,
                            length: track.length,
                            name: track.display_name(),
                        });
                    }
                }
            }
        }

        Ok(SessionLayout {
            tracks,
            index,
            count: self.sessions.len(),
        })
    }

    fn data_track_input(&self, streaming: bool, xa: bool) -> Result<TrackInput> {
        let source = if streaming {
            TrackSource::Stdin
        } else {
            TrackSource::File(self.buffers.image_path.clone().ok_or_else(|| {
                JobError::producer("Image creation", "the image buffer is missing")
            })?)
        };

        Ok(TrackInput {
            kind: TrackKind::Data { xa },
            source,
            length: self
                .buffers
                .image_sectors
                .unwrap_or_else(|| self.project.data_length()),
            name: format!("ISO9660 data ({})", self.project.data.volume_label),
        })
    }

    fn audio_source(&mut self, index: usize, streaming: bool) -> Result<TrackSource> {
        if !streaming {
            return self
                .buffers
                .track_files
                .get(index)
                .cloned()
                .map(TrackSource::File)
                .ok_or_else(|| {
                    JobError::producer("Audio decoding", format!("track {} was not decoded", index + 1))
                });
        }

        if self.feeds_stdin(Content::Audio) {
            return Ok(TrackSource::Stdin);
        }

        let pipe = self
            .buffers
            .artifacts
            .create_pipe(&format!("track{:02}", index + 1))?;
        self.buffers.track_pipes.push(pipe.clone());
        Ok(TrackSource::Pipe(pipe))
    }

    fn write_toc(&mut self, layout: &SessionLayout) -> Result<PathBuf> {
        let prefix = format!("session{}", layout.index + 1);
        let (path, mut file) = self.buffers.artifacts.create_file(&prefix, "toc", false)?;
        file.write_all(toc::render(layout).as_bytes())
            .map_err(|e| JobError::artifact(&path, e))?;
        log::debug!("Wrote toc file {}", path.display());
        Ok(path)
    }

    fn start_writer(&mut self) -> Result<()> {
        self.state.set_phase(JobPhase::Writing);
        self.writer
            .as_mut()
            .ok_or_else(|| JobError::WriterFailure("no writer was prepared".to_string()))?
            .start()?;

        if self.project.transfer == TransferMode::Streaming {
            if let Some(first) = self.session_contents().first().copied() {
                self.start_streaming(first);
            }
        }
        Ok(())
    }

    fn on_writer(&mut self, session: usize, event: WriterEvent) -> Result<()> {
        if session != self.state.session || self.writer.is_none() {
            log::debug!("Ignoring event of finished writer {}", session);
            return Ok(());
        }

        match event {
            WriterEvent::Percent(p) => {
                let value = self.progress.written(session, p);
                self.publish_percent(value);
            }
            WriterEvent::SubPercent(p) => self.emit(JobEvent::SubPercent(p)),
            WriterEvent::NextTrack { current, total } => {
                log::debug!("Session {} at track {} of {}", session + 1, current, total);
                let name = current
                    .checked_sub(1)
                    .and_then(|i| self.session_names.get(i))
                    .cloned()
                    .unwrap_or_default();
                self.emit(JobEvent::NewSubTask(format!(
                    "Writing track {} of {} ({})",
                    self.tracks_before_session() + current,
                    self.project.number_of_tracks(),
                    name
                )));
            }
            WriterEvent::Throughput(kbs) => self.emit(JobEvent::WritingSpeed(kbs)),
            WriterEvent::Buffer(fill) => self.emit(JobEvent::BufferStatus(fill)),
            WriterEvent::Info(message, severity) => {
                self.emit(JobEvent::InfoMessage(message, severity))
            }
            WriterEvent::Finished(true) => return self.on_writer_finished(),
            WriterEvent::Finished(false) => {
                return Err(JobError::WriterFailure(
                    "the writing process reported an error".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn on_writer_finished(&mut self) -> Result<()> {
        log::info!("Session {} written", self.state.session + 1);
        self.writer = None;
        self.close_pipe();

        if self.state.session + 1 < self.sessions.len() {
            self.state.set_phase(JobPhase::SessionReload);
            self.emit(JobEvent::InfoMessage(
                "Reloading the media".to_string(),
                Severity::Process,
            ));
            let reload = self.drive.reload();
            self.spawn_media(reload, MediaEvent::Reloaded);
        } else {
            self.complete();
        }
        Ok(())
    }

    fn on_media(&mut self, event: MediaEvent) -> Result<()> {
        self.media_task = None;

        match event {
            MediaEvent::EmptyDiscReady(result) => {
                result?;
                if self.state.phase == JobPhase::WaitingForMedia {
                    self.start_writer()?;
                }
            }
            MediaEvent::Reloaded(result) => {
                result?;
                if self.state.phase == JobPhase::SessionReload {
                    self.begin_session(self.state.session + 1)?;
                }
            }
        }
        Ok(())
    }

    fn spawn_media(
        &mut self,
        operation: BoxFuture<'static, Result<()>>,
        wrap: fn(Result<()>) -> MediaEvent,
    ) {
        let tx = self.tx.clone();
        self.media_task = Some(tokio::spawn(async move {
            let result = operation.await;
            let _ = tx.send(ComponentEvent::Media(wrap(result)));
        }));
    }

    fn complete(&mut self) {
        let keep = !self.project.remove_buffer_files
            && self.project.transfer == TransferMode::Staged;
        self.remove_buffers(keep);

        self.state.set_phase(JobPhase::Completed);
        self.emit(JobEvent::Finished(true));
        self.outcome = Some(JobOutcome::Success);
    }

    /// Handle an error once: stop everything, clean up, report
    fn fail(&mut self, error: JobError) {
        if error.is_cancellation() {
            self.cancel();
            return;
        }
        if self.state.canceled || self.state.error_reported {
            log::debug!("Suppressing error after the run settled: {}", error);
            return;
        }

        self.state.error_reported = true;
        log::error!("Mixed-mode job failed: {}", error);

        self.stop_components();
        self.emit(JobEvent::InfoMessage(error.to_string(), Severity::Error));
        self.remove_buffers(false);

        self.state.set_phase(JobPhase::Failed);
        self.emit(JobEvent::Finished(false));
        self.outcome = Some(JobOutcome::Failed(error.to_string()));
    }

    fn cancel(&mut self) {
        if self.state.phase == JobPhase::Idle || self.state.is_settled() {
            return;
        }

        log::info!("Canceling mixed-mode job in phase {:?}", self.state.phase);
        self.state.canceled = true;

        self.stop_components();
        self.remove_buffers(false);

        self.state.set_phase(JobPhase::Canceled);
        self.emit(JobEvent::Canceled);
        self.emit(JobEvent::Finished(false));
        self.outcome = Some(JobOutcome::Canceled);
    }

    /// Cancel every collaborator, started or not
    fn stop_components(&mut self) {
        self.image.cancel();
        self.audio.cancel();
        if let Some(mut writer) = self.writer.take() {
            writer.cancel();
        }
        if let Some(task) = self.media_task.take() {
            task.abort();
        }
    }

    fn remove_buffers(&mut self, keep_retainable: bool) {
        self.close_pipe();
        self.buffers.wave = None;
        self.buffers.image = None;

        if self.buffers.artifacts.is_empty() {
            return;
        }

        if keep_retainable {
            log::info!(
                "Keeping buffer files in {}",
                self.buffers.artifacts.dir().display()
            );
        } else {
            self.emit(JobEvent::InfoMessage(
                "Removing buffer files.".to_string(),
                Severity::Info,
            ));
        }

        for failure in self.buffers.artifacts.remove(keep_retainable) {
            log::warn!(
                "Could not delete {}: {}",
                failure.path.display(),
                failure.error
            );
            self.emit(JobEvent::InfoMessage(
                format!("Could not delete file {}.", failure.path.display()),
                Severity::Warning,
            ));
        }
    }

    fn finish_wave(&mut self) -> Result<()> {
        match self.buffers.wave.take() {
            Some(wave) => wave.finalize(),
            None => Ok(()),
        }
    }

    fn close_pipe(&mut self) {
        if let Some(mut pipe) = self.buffers.pipe.take() {
            pipe.close();
        }
    }

    fn publish_percent(&mut self, value: f64) {
        if let Some(percent) = self.progress.advance(value) {
            self.emit(JobEvent::Percent(percent));
        }
    }

    fn session_contents(&self) -> Vec<Content> {
        self.sessions
            .get(self.state.session)
            .cloned()
            .unwrap_or_default()
    }

    fn session_task(&self) -> String {
        let verb = if self.project.simulate {
            "Simulating"
        } else {
            "Writing"
        };
        if self.sessions.len() > 1 {
            let which = if self.state.session == 0 {
                "first"
            } else {
                "second"
            };
            format!("{} {} session", verb, which)
        } else {
            verb.to_string()
        }
    }

    fn tracks_before_session(&self) -> usize {
        self.sessions
            .iter()
            .take(self.state.session)
            .flatten()
            .map(|content| match content {
                Content::Data => 1,
                Content::Audio => self.project.audio_tracks.len(),
            })
            .sum()
    }

    /// cdrecord reads audio from per-track pipes; everything else goes through stdin
    fn feeds_stdin(&self, content: Content) -> bool {
        content == Content::Data || self.app == WritingApp::Cdrdao
    }

    fn producer_sender(&self, kind: ProducerKind) -> ProducerSender {
        ProducerSender::new(kind, self.tx.clone())
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

fn content_of(kind: ProducerKind) -> Content {
    match kind {
        ProducerKind::Image => Content::Data,
        ProducerKind::Audio => Content::Audio,
    }
}

/// Drive one write to completion while keeping the event channel drained.
/// Returns None when the run was canceled mid-write. A failure of the
/// session's writer aborts the write, since its input will never drain.
async fn feed<F>(
    rx: &mut UnboundedReceiver<ComponentEvent>,
    pending: &mut VecDeque<ComponentEvent>,
    token: &CancelToken,
    session: usize,
    write: F,
) -> Option<io::Result<()>>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(write);

    loop {
        tokio::select! {
            result = &mut write => return Some(result),
            _ = token.canceled() => return None,
            event = rx.recv() => match event {
                Some(ComponentEvent::Writer(s, WriterEvent::Finished(false))) if s == session => {
                    return Some(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "the writing process exited",
                    )));
                }
                Some(event) => pending.push_back(event),
                None => return Some(Err(io::Error::from(io::ErrorKind::BrokenPipe))),
            },
        }
    }
}
