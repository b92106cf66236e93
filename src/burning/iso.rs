//! ISO image producer using genisoimage (or mkisofs)
//!
//! The image is never written to disk here: the producer streams
//! genisoimage's stdout to the job chunk by chunk, and the job decides
//! whether the bytes land in a buffer file or go straight to the writer.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::core::DataSource;
use crate::job::{ChunkGate, ImageProducer, Producer, ProducerEvent, ProducerSender, Severity};

const CHUNK_BYTES: usize = 64 * 1024;

/// Streams an ISO9660 image of a data tree
pub struct IsoImager {
    program: PathBuf,
    source: DataSource,
    gate: ChunkGate,
    task: Option<JoinHandle<()>>,
}

impl IsoImager {
    pub fn new(program: PathBuf, source: DataSource) -> Self {
        Self {
            program,
            source,
            gate: ChunkGate::new(),
            task: None,
        }
    }
}

/// Options shared by size calculation and image creation
fn filesystem_arguments(source: &DataSource) -> Vec<String> {
    vec![
        "-R".to_string(),
        "-J".to_string(),
        "-V".to_string(),
        source.volume_label.clone(),
    ]
}

pub fn size_arguments(source: &DataSource) -> Vec<String> {
    let mut args = vec!["-print-size".to_string(), "-quiet".to_string()];
    args.extend(filesystem_arguments(source));
    args.push(source.root.display().to_string());
    args
}

pub fn image_arguments(source: &DataSource) -> Vec<String> {
    let mut args = vec!["-gui".to_string()];
    args.extend(filesystem_arguments(source));
    args.push(source.root.display().to_string());
    args
}

/// genisoimage prints the sector count as the last number of its output
pub fn parse_print_size(output: &str) -> Option<u64> {
    output
        .lines()
        .rev()
        .filter_map(|line| line.split_whitespace().last())
        .find_map(|token| token.trim_end_matches('.').parse().ok())
}

/// " 45.12% done, estimate finish ..." -> 45
pub fn parse_progress(line: &str) -> Option<u8> {
    let (value, rest) = line.trim_start().split_once('%')?;
    if !rest.trim_start().starts_with("done") {
        return None;
    }
    value
        .trim()
        .parse::<f64>()
        .ok()
        .map(|p| p.clamp(0.0, 100.0) as u8)
}

impl Producer for IsoImager {
    fn start(&mut self, events: ProducerSender) {
        self.gate = ChunkGate::new();
        let gate = self.gate.clone();
        let program = self.program.clone();
        let args = image_arguments(&self.source);

        self.task = Some(tokio::spawn(async move {
            let result = stream_image(&program, &args, &gate, &events).await;
            if gate.is_canceled() {
                log::debug!("Image creation stopped after cancel");
                return;
            }
            match result {
                Ok(()) => {
                    events.send(ProducerEvent::Percent(100));
                    events.send(ProducerEvent::Finished(true));
                }
                Err(reason) => {
                    log::error!("Image creation failed: {}", reason);
                    events.send(ProducerEvent::Info(reason, Severity::Warning));
                    events.send(ProducerEvent::Finished(false));
                }
            }
        }));
    }

    fn resume(&mut self) {
        self.gate.resume();
    }

    fn cancel(&mut self) {
        self.gate.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl ImageProducer for IsoImager {
    fn calculate_size(&mut self, events: ProducerSender) {
        self.gate = ChunkGate::new();
        let gate = self.gate.clone();
        let program = self.program.clone();
        let args = size_arguments(&self.source);

        self.task = Some(tokio::spawn(async move {
            log::info!("Calculating image size: {} {}", program.display(), args.join(" "));
            let result = calculate(&program, &args, &gate).await;
            if gate.is_canceled() {
                log::debug!("Size calculation stopped after cancel");
                return;
            }
            if let Err(e) = &result {
                log::error!("Image size calculation failed: {}", e);
            }
            events.send(ProducerEvent::SizeCalculated(result));
        }));
    }
}

async fn calculate(program: &Path, args: &[String], gate: &ChunkGate) -> Result<u64, String> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to execute {}: {}", program.display(), e))?;
    gate.process().register(child.id());

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("Error waiting for {}: {}", program.display(), e))?;
    gate.process().clear();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(stderr
            .lines()
            .last()
            .unwrap_or("size calculation failed")
            .to_string());
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    parse_print_size(&text).ok_or_else(|| "could not read the image size".to_string())
}

async fn stream_image(
    program: &Path,
    args: &[String],
    gate: &ChunkGate,
    events: &ProducerSender,
) -> Result<(), String> {
    log::info!("Starting {} {}", program.display(), args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to execute {}: {}", program.display(), e))?;
    gate.process().register(child.id());

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| "image tool has no output".to_string())?;

    // progress and the last message come from stderr
    let stderr_task = child.stderr.take().map(|stderr| {
        let events = events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = None;
            let mut percent = None;
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress(&line) {
                    Some(p) if percent != Some(p) => {
                        percent = Some(p);
                        events.send(ProducerEvent::Percent(p));
                    }
                    Some(_) => {}
                    None => {
                        log::debug!("genisoimage: {}", line);
                        last = Some(line);
                    }
                }
            }
            last
        })
    });

    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut total = 0u64;
    loop {
        let n = stdout
            .read(&mut buf)
            .await
            .map_err(|e| format!("Failed to read image data: {}", e))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if !gate.send_chunk(events, buf[..n].to_vec()).await {
            gate.process().kill();
            return Ok(());
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| format!("Error waiting for image tool: {}", e))?;
    gate.process().clear();

    let last_line = match stderr_task {
        Some(task) => task.await.ok().flatten(),
        None => None,
    };

    if status.success() {
        log::info!("Image stream complete, {} bytes", total);
        Ok(())
    } else {
        Err(last_line.unwrap_or_else(|| format!("image tool exited with {}", status)))
    }
}
