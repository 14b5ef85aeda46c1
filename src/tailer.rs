//! Log tailing with rotation and truncation detection.
//!
//! VRChat writes to `output_log_YYYY-MM-DD_HH-MM-SS.txt` files in its log
//! directory and starts a fresh file on every client launch. The tailer
//! picks the newest candidate via [`LogScorer`], streams appended lines
//! through the [`LineClassifier`], and follows rotation without
//! replaying content that was already consumed.
//!
//! # Architecture
//!
//! The tailer is a single long-lived task. It polls rather than relying
//! on file system events: the directory listing is re-scored on every
//! idle poll, which doubles as rotation detection. Classified events flow
//! to the consumer through a bounded, ordered channel; the channel closes
//! when the tailer exits, which is how the consumer learns the tailer is
//! gone. Cancellation is observed within one poll or backoff interval.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};

use chrono::NaiveDateTime;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{LineClassifier, LogEvent};

/// Idle poll interval between line reads and directory re-scores.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Backoff after a failed open/read before retrying.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(1500);

/// Minimum spacing between repeated "directory missing" / "no log file"
/// status lines.
const STATUS_THROTTLE: Duration = Duration::from_secs(10);

/// Timestamp pattern embedded in rotated log filenames.
const FILENAME_TS_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Events emitted by the tailer toward the session consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailerEvent {
    /// A classified presence event from the tailed file.
    Line(LogEvent),

    /// The tailer switched to a newer log file; session state belonging
    /// to the previous file is stale.
    LogSwitched(PathBuf),
}

/// Tails the newest VRChat log file in a directory.
#[derive(Debug)]
pub struct LogTailer {
    log_dir: PathBuf,
    classifier: LineClassifier,
    scorer: LogScorer,
    events: mpsc::Sender<TailerEvent>,
    cancel: CancellationToken,
}

impl LogTailer {
    #[must_use]
    pub fn new(
        log_dir: PathBuf,
        classifier: LineClassifier,
        events: mpsc::Sender<TailerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log_dir,
            classifier,
            scorer: LogScorer::new(),
            events,
            cancel,
        }
    }

    /// Runs until cancelled or until the consumer drops the receiver.
    ///
    /// Never returns a value; transient failures surface as throttled
    /// status lines and the loop keeps going.
    pub async fn run(self) {
        let mut current: Option<PathBuf> = None;
        let mut offset: u64 = 0;
        let mut dir_status = Throttle::new(STATUS_THROTTLE);
        let mut file_status = Throttle::new(STATUS_THROTTLE);

        info!(log_dir = %self.log_dir.display(), "Log tailer started");

        while !self.cancel.is_cancelled() {
            if !self.log_dir.is_dir() {
                if dir_status.ready() {
                    info!(
                        "Waiting for VRChat log directory at {}",
                        self.log_dir.display()
                    );
                }
                if self.pause(POLL_INTERVAL).await {
                    break;
                }
                continue;
            }

            let Some(best) = self.scorer.newest_log_file(&self.log_dir) else {
                if file_status.ready() {
                    info!("No log files found in {}", self.log_dir.display());
                }
                if self.pause(POLL_INTERVAL).await {
                    break;
                }
                continue;
            };

            match &current {
                Some(open) if *open == best => {}
                Some(_) => {
                    // Rotation: resume at the new file's current length so
                    // only fresh appends are read, not historical content.
                    offset = file_len(&best);
                    info!("Switching to newest log: {}", best.display());
                    if self
                        .events
                        .send(TailerEvent::LogSwitched(best.clone()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    current = Some(best.clone());
                }
                None => {
                    info!("Tailing log: {}", best.display());
                    offset = 0;
                    current = Some(best.clone());
                }
            }

            match read_new_events(&self.classifier, &best, &mut offset) {
                Ok(events) => {
                    let had_events = !events.is_empty();
                    let mut closed = false;
                    for event in events {
                        if self.events.send(TailerEvent::Line(event)).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break;
                    }
                    if !had_events && self.pause(POLL_INTERVAL).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        path = %best.display(),
                        error = %e,
                        "Failed to read log file, backing off"
                    );
                    if self.pause(READ_RETRY_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        debug!("Log tailer stopped");
        // Dropping `self.events` closes the channel; the consumer loop
        // exits when it drains the remaining events.
    }

    /// Sleeps for `duration` unless cancelled first. Returns `true` when
    /// the tailer should stop.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

/// Reads complete lines from `path` starting at `*offset`, classifying
/// each one. Detects in-place truncation (file shrank below the offset)
/// and restarts from the beginning. A trailing partial line is left for
/// the next read; `*offset` only ever covers whole lines.
fn read_new_events(
    classifier: &LineClassifier,
    path: &Path,
    offset: &mut u64,
) -> std::io::Result<Vec<LogEvent>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    if len < *offset {
        info!(
            path = %path.display(),
            old_offset = *offset,
            new_size = len,
            "Log file shrank, treating as truncation"
        );
        *offset = 0;
    }
    if *offset >= len {
        return Ok(Vec::new());
    }

    file.seek(SeekFrom::Start(*offset))?;
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 || !buf.ends_with(b"\n") {
            break;
        }
        *offset += n as u64;

        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        if let Some(event) = classifier.classify(trimmed) {
            events.push(event);
        }
    }

    Ok(events)
}

/// Scores and selects log file candidates.
///
/// Holds its one compiled pattern as an instance field, like the
/// classifier; no global regex state.
#[derive(Debug)]
pub struct LogScorer {
    filename_ts: Regex,
}

impl Default for LogScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogScorer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Fixed literal exercised by the unit tests.
            filename_ts: Regex::new(r"\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}")
                .expect("invalid built-in pattern"),
        }
    }

    /// Picks the highest-scoring `output_log*.txt` in `dir`.
    ///
    /// Ties break toward the lexicographically larger path so selection
    /// stays deterministic.
    pub fn newest_log_file(&self, dir: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(dir).ok()?;
        let mut best: Option<(i64, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_log_candidate(&path) {
                continue;
            }
            let score = self.score_log_file(&path);
            let better = match &best {
                None => true,
                Some((top, top_path)) => score > *top || (score == *top && path > *top_path),
            };
            if better {
                best = Some((score, path));
            }
        }
        best.map(|(_, path)| path)
    }

    /// Scores a candidate as `max(mtime, filename timestamp)`, both in
    /// unix seconds. A fixed-name "live" log relies purely on its
    /// modification time; a rotated file's embedded timestamp dominates
    /// stale mtimes from copies or restored backups.
    pub fn score_log_file(&self, path: &Path) -> i64 {
        let mtime = std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let stamped = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.filename_timestamp(n))
            .unwrap_or(0);
        mtime.max(stamped)
    }

    /// Parses a `..._YYYY-MM-DD_HH-MM-SS...` filename timestamp as a
    /// unix timestamp, treating it as UTC for scoring purposes. Relative
    /// ordering is all that matters here.
    fn filename_timestamp(&self, name: &str) -> Option<i64> {
        let m = self.filename_ts.find(name)?;
        let parsed = NaiveDateTime::parse_from_str(m.as_str(), FILENAME_TS_FORMAT).ok()?;
        Some(parsed.and_utc().timestamp())
    }
}

fn is_log_candidate(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("output_log"))
        && path.extension().is_some_and(|ext| ext == "txt")
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Rate limiter for repeated status lines.
#[derive(Debug)]
struct Throttle {
    last: Option<Instant>,
    interval: Duration,
}

impl Throttle {
    fn new(interval: Duration) -> Self {
        Self {
            last: None,
            interval,
        }
    }

    fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
