//! Fetcher backed by an external executable.

use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use super::config::FetcherConfig;
use super::error::FetchError;
use super::tracklist::{parse_track_listing, TrackListing};
use super::traits::Fetcher;
use crate::request::Selection;

/// Runs the configured fetch program as a child process.
///
/// Full mode passes only the URL. Selective mode adds the select flag and
/// writes the track descriptor, newline terminated, to the child's stdin.
/// The output directory is handed over through an environment variable.
pub struct SubprocessFetcher {
    config: FetcherConfig,
}

impl SubprocessFetcher {
    /// Creates a new fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    /// Creates a new fetcher with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(FetcherConfig::default())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let Some(dir) = &self.config.tool_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: io::Error) -> FetchError {
        if e.kind() == io::ErrorKind::NotFound {
            FetchError::ToolNotFound {
                program: self.config.program.clone(),
            }
        } else {
            FetchError::Io(e)
        }
    }
}

/// Write the selection to the child and close its stdin.
async fn write_stdin(stdin: Option<ChildStdin>, payload: Option<String>) -> io::Result<()> {
    let (Some(mut stdin), Some(payload)) = (stdin, payload) else {
        return Ok(());
    };
    match stdin.write_all(payload.as_bytes()).await {
        // The child may exit before reading; its exit status decides the outcome.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            warn!("Fetch process closed stdin before reading the selection");
            Ok(())
        }
        result => result,
    }
}

/// Log every stdout line at debug level.
async fn drain_lines<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<()> {
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        debug!("fetch: {}", String::from_utf8_lossy(&line).trim_end());
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
pub(crate) async fn read_bounded<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> io::Result<Vec<u8>> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
}

fn truncate_text(bytes: &[u8], limit: usize) -> String {
    let bytes = &bytes[..bytes.len().min(limit)];
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[async_trait]
impl Fetcher for SubprocessFetcher {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn fetch(
        &self,
        url: &str,
        selection: &Selection,
        workdir: &Path,
    ) -> Result<(), FetchError> {
        let descriptor = selection.descriptor();

        let mut cmd = self.base_command();
        if descriptor.is_some() {
            cmd.arg(&self.config.select_flag);
        }
        cmd.arg(url)
            .env(&self.config.workdir_env, workdir)
            .stdin(if descriptor.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            "Starting {} fetch of {} into {}",
            selection.kind(),
            url,
            workdir.display()
        );

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.max_stderr_bytes;
        let payload = descriptor.map(|d| format!("{}\n", d));

        let run = async {
            let (stdin_result, stdout_result, stderr_result) = tokio::join!(
                write_stdin(stdin, payload),
                drain_lines(stdout),
                read_bounded(stderr, limit),
            );
            stdin_result?;
            stdout_result?;
            let captured = stderr_result?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((status, captured))
        };

        let result = match self.config.timeout_secs {
            Some(secs) => {
                let timed = timeout(Duration::from_secs(secs), run).await;
                match timed {
                    Ok(result) => result,
                    Err(_) => {
                        // Kill the process on timeout
                        let _ = child.kill().await;
                        warn!("Fetch of {} timed out after {}s", url, secs);
                        return Err(FetchError::Timeout { timeout_secs: secs });
                    }
                }
            }
            None => run.await,
        };

        let (status, captured) = result?;
        if !status.success() {
            let stderr = truncate_text(&captured, limit);
            warn!(
                "Fetch of {} exited with code {:?}: {}",
                url,
                status.code(),
                stderr
            );
            return Err(FetchError::failed(status.code(), stderr));
        }

        info!("Fetch of {} finished", url);
        Ok(())
    }

    async fn track_listing(&self, url: &str) -> Result<TrackListing, FetchError> {
        let mut cmd = self.base_command();
        cmd.arg(&self.config.info_flag)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Fetching track listing for {}", url);

        let output = match self.config.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), cmd.output())
                .await
                .map_err(|_| FetchError::Timeout { timeout_secs: secs })?,
            None => cmd.output().await,
        }
        .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(FetchError::failed(
                output.status.code(),
                truncate_text(&output.stderr, self.config.max_stderr_bytes),
            ));
        }

        parse_track_listing(&String::from_utf8_lossy(&output.stdout))
    }
}
