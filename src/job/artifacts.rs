//! Buffer artifacts owned by a run
//!
//! Image files, per-track WAV files, named pipes and toc files all live in the
//! configured temporary directory and are registered here the moment their
//! path is chosen, so every exit path can remove them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use super::error::{JobError, Result};

/// Delay between attempts on a pipe that has no reader or no room yet
const PIPE_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    RegularFile,
    NamedPipe,
}

impl ArtifactKind {
    fn describe(self) -> &'static str {
        match self {
            ArtifactKind::RegularFile => "buffer file",
            ArtifactKind::NamedPipe => "named pipe",
        }
    }
}

/// One temporary file or pipe created for a run
#[derive(Debug, Clone)]
pub struct BufferArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// Kept after a successful run when the project asks to keep buffer files
    pub retainable: bool,
}

/// A file that could not be deleted during cleanup
#[derive(Debug)]
pub struct RemovalFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

/// Every artifact of the current run
#[derive(Debug, Default)]
pub struct ArtifactSet {
    dir: PathBuf,
    artifacts: Vec<BufferArtifact>,
}

impl ArtifactSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Choose a fresh path in the temp directory and register it
    pub fn allocate(&mut self, prefix: &str, extension: &str, kind: ArtifactKind, retainable: bool) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| JobError::artifact(&self.dir, e))?;

        let path = self
            .dir
            .join(format!("{}_{}.{}", prefix, Uuid::new_v4().simple(), extension));
        self.artifacts.push(BufferArtifact {
            path: path.clone(),
            kind,
            retainable,
        });
        Ok(path)
    }

    /// Create a regular buffer file opened for writing
    pub fn create_file(&mut self, prefix: &str, extension: &str, retainable: bool) -> Result<(PathBuf, File)> {
        let path = self.allocate(prefix, extension, ArtifactKind::RegularFile, retainable)?;
        let file = File::create(&path).map_err(|e| JobError::artifact(&path, e))?;
        Ok((path, file))
    }

    /// Create a named pipe
    pub fn create_pipe(&mut self, prefix: &str) -> Result<PathBuf> {
        let path = self.allocate(prefix, "fifo", ArtifactKind::NamedPipe, false)?;
        make_fifo(&path).map_err(|e| JobError::artifact(&path, e))?;
        Ok(path)
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Delete artifacts from disk. With `keep_retainable` the staged buffer
    /// files survive and stay registered; pipes and toc files always go.
    pub fn remove(&mut self, keep_retainable: bool) -> Vec<RemovalFailure> {
        let mut failures = Vec::new();
        let mut kept = Vec::new();

        for artifact in self.artifacts.drain(..) {
            // a pipe is never worth keeping
            if keep_retainable && artifact.retainable && artifact.kind == ArtifactKind::RegularFile {
                kept.push(artifact);
                continue;
            }
            // symlink_metadata sees a fifo without opening it
            if fs::symlink_metadata(&artifact.path).is_err() {
                continue;
            }
            match fs::remove_file(&artifact.path) {
                Ok(()) => log::debug!("Removed {} {}", artifact.kind.describe(), artifact.path.display()),
                Err(error) => failures.push(RemovalFailure {
                    path: artifact.path,
                    error,
                }),
            }
        }

        self.artifacts = kept;
        failures
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), libc::S_IRUSR | libc::S_IWUSR) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "named pipes are not supported on this platform",
    ))
}

/// Buffered writer for the staged image file
#[derive(Debug)]
pub struct ImageBuffer {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl ImageBuffer {
    pub fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .map_err(|e| JobError::artifact(&self.path, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and close; returns the number of bytes in the file
    pub fn finish(mut self) -> Result<u64> {
        self.writer
            .flush()
            .map_err(|e| JobError::artifact(&self.path, e))?;
        Ok(self.written)
    }
}

/// Write end of a named pipe, opened non-blocking
///
/// The descriptor is closed when the writer is closed or dropped.
#[derive(Debug)]
pub struct PipeWriter {
    path: PathBuf,
    file: Option<File>,
}

impl PipeWriter {
    /// Opening is deferred to the first write, when the reader may have shown up
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ok(false) while no process has the pipe open for reading
    fn try_open(&mut self) -> io::Result<bool> {
        let mut options = OpenOptions::new();
        options.write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NONBLOCK);
        }

        match options.open(&self.path) {
            Ok(file) => {
                self.file = Some(file);
                Ok(true)
            }
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write the whole buffer, retrying while the pipe is full or unread
    pub async fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            if self.file.is_none() && !self.try_open()? {
                tokio::time::sleep(PIPE_RETRY_DELAY).await;
                continue;
            }
            let Some(file) = self.file.as_mut() else {
                continue;
            };

            match file.write(buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(PIPE_RETRY_DELAY).await;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if self.file.take().is_some() {
            log::debug!("Closed pipe {}", self.path.display());
        }
    }
}
