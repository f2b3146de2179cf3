//! RTSP frame source.
//!
//! Frames are decoded by an ffmpeg child process forced onto TCP transport
//! and streamed as raw BGR24 over a pipe. A pump thread feeds a small
//! bounded channel, which gives the reader a hard timeout and a few frames
//! of slack against network jitter. The worker drives the reconnect policy
//! through `VideoSource`.

use crate::error::WorkerError;
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    /// Connection attempts before `open` gives up.
    pub open_attempts: u32,
    /// Delay between connection attempts.
    pub open_retry_delay: Duration,
    /// RTSP socket timeout passed to ffmpeg.
    pub socket_timeout: Duration,
    /// Longest wait for a single frame before the read counts as a miss.
    pub read_timeout: Duration,
    /// Bounded frame queue between the pump thread and the reader.
    pub queue_depth: usize,
    /// Consecutive missed reads that trigger a reconnect.
    pub max_consecutive_failures: u32,
    /// Longest tolerated gap since the last good frame.
    pub max_outage: Duration,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            open_attempts: 5,
            open_retry_delay: Duration::from_secs(3),
            socket_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(15),
            queue_depth: 5,
            max_consecutive_failures: 20,
            max_outage: Duration::from_secs(30),
        }
    }
}

/// Seam between the worker loop and the stream plumbing. The production
/// implementation shells out to ffmpeg; tests script the reads.
pub trait VideoSource: Send {
    fn dimensions(&self) -> (u32, u32);
    fn fps(&self) -> f64;

    /// `Ok(Some)` with a packed BGR24 buffer, or `Ok(None)` when no frame
    /// arrived in time (failure accounting advances).
    fn try_read(&mut self) -> Result<Option<Vec<u8>>>;

    /// Whether the failure counters call for a reconnect.
    fn should_reconnect(&self) -> bool;

    /// Release the current handle and try one reopen; `Ok(true)` when a
    /// probe frame decodes on the new handle.
    fn reconnect(&mut self) -> Result<bool>;
}

pub struct FrameSource {
    config: SourceConfig,
    width: u32,
    height: u32,
    fps: f64,
    child: Option<Child>,
    frames: Option<Receiver<Vec<u8>>>,
    consecutive_failures: u32,
    last_good: Instant,
}

impl FrameSource {
    /// Probe the stream, then connect with the bounded retry policy. Each
    /// attempt counts as successful only once a probe frame decodes.
    pub fn open(config: SourceConfig) -> Result<Self> {
        let (width, height) = probe_dimensions(&config.url)
            .map_err(|e| WorkerError::Network(format!("probe {}: {e:#}", config.url)))?;
        let fps = probe_fps(&config.url).unwrap_or(15.0);
        info!(url = %config.url, width, height, fps, "stream probed");

        let mut source = Self {
            config,
            width,
            height,
            fps,
            child: None,
            frames: None,
            consecutive_failures: 0,
            last_good: Instant::now(),
        };

        for attempt in 1..=source.config.open_attempts {
            match source.spawn_reader().and_then(|_| source.probe_frame()) {
                Ok(true) => {
                    info!(url = %source.config.url, attempt, "stream connected");
                    return Ok(source);
                }
                Ok(false) => {
                    warn!(url = %source.config.url, attempt, "no probe frame decoded");
                }
                Err(e) => {
                    warn!(url = %source.config.url, attempt, error = %e, "connection attempt failed");
                }
            }
            source.release();
            thread::sleep(source.config.open_retry_delay);
        }

        Err(WorkerError::Network(format!(
            "cannot connect to {} after {} attempts",
            source.config.url, source.config.open_attempts
        ))
        .into())
    }

    fn spawn_reader(&mut self) -> Result<()> {
        let frame_len = (self.width * self.height * 3) as usize;
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-nostdin").arg("-loglevel").arg("error");
        if self.config.url.starts_with("rtsp://") {
            cmd.args(["-rtsp_transport", "tcp"]).args([
                "-stimeout",
                &self.config.socket_timeout.as_micros().to_string(),
            ]);
        }
        cmd.args(["-i", &self.config.url])
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "-an"])
            .arg("pipe:1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null());

        let mut child = cmd.spawn().context("spawn ffmpeg reader")?;
        let mut stdout = child.stdout.take().context("ffmpeg reader has no stdout")?;

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(self.config.queue_depth);
        thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; frame_len];
                loop {
                    if stdout.read_exact(&mut buf).is_err() {
                        break;
                    }
                    // Blocking send applies backpressure through the pipe
                    // when the reader falls behind.
                    if tx.send(buf.clone()).is_err() {
                        break;
                    }
                }
                debug!("frame pump exited");
            })
            .context("spawn frame pump thread")?;

        self.child = Some(child);
        self.frames = Some(rx);
        Ok(())
    }

    fn probe_frame(&mut self) -> Result<bool> {
        let Some(frames) = &self.frames else {
            return Ok(false);
        };
        match frames.recv_timeout(self.config.read_timeout) {
            Ok(_) => {
                self.consecutive_failures = 0;
                self.last_good = Instant::now();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Drop the receiver and kill the child; the pump thread unwinds on
    /// its own once the pipe or channel closes.
    fn release(&mut self) {
        self.frames = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl VideoSource for FrameSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn try_read(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(frames) = &self.frames else {
            self.consecutive_failures += 1;
            return Ok(None);
        };
        match frames.recv_timeout(self.config.read_timeout) {
            Ok(buf) => {
                self.consecutive_failures = 0;
                self.last_good = Instant::now();
                Ok(Some(buf))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.consecutive_failures += 1;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Child died; avoid a hot loop while the counters build up.
                self.consecutive_failures += 1;
                thread::sleep(Duration::from_millis(500));
                Ok(None)
            }
        }
    }

    fn should_reconnect(&self) -> bool {
        self.consecutive_failures >= self.config.max_consecutive_failures
            || self.last_good.elapsed() > self.config.max_outage
    }

    fn reconnect(&mut self) -> Result<bool> {
        self.release();
        thread::sleep(self.config.open_retry_delay);
        self.spawn_reader()?;
        let ok = self.probe_frame()?;
        if ok {
            info!(url = %self.config.url, "stream reconnected");
        }
        Ok(ok)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Probe stream dimensions with ffprobe, forcing TCP for RTSP inputs.
fn probe_dimensions(url: &str) -> Result<(u32, u32)> {
    let output = ffprobe(url, "stream=width,height")?;
    let parts: Vec<&str> = output.trim().split(',').collect();
    if parts.len() != 2 {
        return Err(anyhow!("unexpected ffprobe output: {output}"));
    }
    let width: u32 = parts[0].trim().parse().context("parse stream width")?;
    let height: u32 = parts[1].trim().parse().context("parse stream height")?;
    Ok((width, height))
}

/// Probe the declared frame rate; `r_frame_rate` comes as "num/den".
fn probe_fps(url: &str) -> Result<f64> {
    let output = ffprobe(url, "stream=r_frame_rate")?;
    let text = output.trim();
    let value = match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().context("parse fps numerator")?;
            let den: f64 = den.trim().parse().context("parse fps denominator")?;
            if den == 0.0 {
                return Err(anyhow!("zero fps denominator"));
            }
            num / den
        }
        None => text.parse().context("parse fps")?,
    };
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(anyhow!("implausible frame rate: {text}"))
    }
}

fn ffprobe(url: &str, entries: &str) -> Result<String> {
    let mut cmd = Command::new("ffprobe");
    if url.starts_with("rtsp://") {
        cmd.args(["-rtsp_transport", "tcp"]);
    }
    let output = cmd
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            entries,
            "-of",
            "csv=p=0",
            url,
        ])
        .output()
        .context("execute ffprobe")?;
    if !output.status.success() {
        return Err(anyhow!("ffprobe failed: {:?}", output.status));
    }
    String::from_utf8(output.stdout).context("ffprobe output is not UTF-8")
}

/// Scripted source for tests: a fixed sequence of reads with optional
/// per-read delay; reconnects always succeed after the configured pause.
pub struct ScriptedSource {
    width: u32,
    height: u32,
    fps: f64,
    reads: std::collections::VecDeque<Option<[u8; 3]>>,
    endless_color: Option<[u8; 3]>,
    read_delay: Duration,
    reconnect_delay: Duration,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    reconnects: Arc<AtomicU32>,
    frame_index: u64,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32, fps: f64, reads: Vec<Option<[u8; 3]>>) -> Self {
        Self {
            width,
            height,
            fps,
            reads: reads.into(),
            endless_color: None,
            read_delay: Duration::from_millis(1),
            reconnect_delay: Duration::from_millis(1),
            consecutive_failures: 0,
            max_consecutive_failures: 20,
            reconnects: Arc::new(AtomicU32::new(0)),
            frame_index: 0,
        }
    }

    /// Source that never runs dry; every read decodes a solid frame.
    pub fn endless(width: u32, height: u32, fps: f64, color: [u8; 3]) -> Self {
        let mut source = Self::new(width, height, fps, Vec::new());
        source.endless_color = Some(color);
        source
    }

    pub fn with_delays(mut self, read_delay: Duration, reconnect_delay: Duration) -> Self {
        self.read_delay = read_delay;
        self.reconnect_delay = reconnect_delay;
        self
    }

    pub fn reconnect_counter(&self) -> Arc<AtomicU32> {
        self.reconnects.clone()
    }
}

impl VideoSource for ScriptedSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn try_read(&mut self) -> Result<Option<Vec<u8>>> {
        thread::sleep(self.read_delay);
        let next = match self.reads.pop_front() {
            Some(step) => step,
            None => self.endless_color,
        };
        match next {
            Some(color) => {
                self.consecutive_failures = 0;
                self.frame_index += 1;
                let mut buf = Vec::with_capacity((self.width * self.height * 3) as usize);
                for _ in 0..(self.width * self.height) {
                    buf.extend_from_slice(&color);
                }
                Ok(Some(buf))
            }
            None => {
                self.consecutive_failures += 1;
                Ok(None)
            }
        }
    }

    fn should_reconnect(&self) -> bool {
        self.consecutive_failures >= self.max_consecutive_failures
    }

    fn reconnect(&mut self) -> Result<bool> {
        thread::sleep(self.reconnect_delay);
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_config_defaults_match_policy() {
        let config = SourceConfig::new("rtsp://cam/stream");
        assert_eq!(config.open_attempts, 5);
        assert_eq!(config.open_retry_delay, Duration::from_secs(3));
        assert!(config.socket_timeout >= Duration::from_secs(60));
        assert!(config.read_timeout >= Duration::from_secs(15));
        assert_eq!(config.queue_depth, 5);
        assert_eq!(config.max_consecutive_failures, 20);
        assert_eq!(config.max_outage, Duration::from_secs(30));
    }

    #[test]
    fn scripted_source_counts_failures_and_resets_on_reconnect() {
        let mut source = ScriptedSource::new(4, 4, 15.0, vec![Some([1, 2, 3]), None, None]);
        assert!(source.try_read().unwrap().is_some());
        assert!(source.try_read().unwrap().is_none());
        assert!(source.try_read().unwrap().is_none());
        assert!(!source.should_reconnect());

        source.max_consecutive_failures = 2;
        assert!(source.should_reconnect());
        assert!(source.reconnect().unwrap());
        assert!(!source.should_reconnect());
        assert_eq!(source.reconnect_counter().load(Ordering::SeqCst), 1);
    }
}
