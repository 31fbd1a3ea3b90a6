//! Tails the daemon's current log file, resuming from a byte offset kept in
//! a marker file next to it.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::handler::ClientHandler;
use crate::state::AttemptSignal;

/// A log file plus the marker recording how much of it was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    log_path: PathBuf,
    offset_path: PathBuf,
}

/// Lines read by [`LogCursor::read_new_lines`] and the offset to commit once
/// they are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub lines: Vec<String>,
    pub next_offset: u64,
}

impl LogCursor {
    /// Marker path is `<log_path>.offset.<uid>`, so two clients tailing the
    /// same file do not share progress.
    pub fn new(log_path: impl Into<PathBuf>, uid: u64) -> Self {
        let log_path = log_path.into();
        let mut marker = log_path.clone().into_os_string();
        marker.push(format!(".offset.{uid}"));
        Self {
            log_path,
            offset_path: PathBuf::from(marker),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn offset_path(&self) -> &Path {
        &self.offset_path
    }

    /// Forget progress so the whole file is replayed.
    pub fn reset(&self) -> io::Result<()> {
        match fs::remove_file(&self.offset_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Recorded offset; a missing or unparsable marker counts as 0.
    pub fn offset(&self) -> u64 {
        fs::read_to_string(&self.offset_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn commit(&self, offset: u64) -> io::Result<()> {
        fs::write(&self.offset_path, offset.to_string())
    }

    /// Complete lines written since the recorded offset. A trailing partial
    /// line is left for the next read. If the file shrank below the offset
    /// it was rotated or truncated and reading restarts at 0.
    pub fn read_new_lines(&self) -> io::Result<LogChunk> {
        let mut file = File::open(&self.log_path)?;
        let len = file.metadata()?.len();

        let mut start = self.offset();
        if start > len {
            tracing::debug!(
                path = %self.log_path.display(),
                offset = start,
                len,
                "log file shrank, restarting from the beginning"
            );
            start = 0;
        }

        file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(idx) => &buf[..=idx],
            None => &[][..],
        };
        let lines = String::from_utf8_lossy(complete)
            .lines()
            .map(str::to_string)
            .collect();

        Ok(LogChunk {
            lines,
            next_offset: start + complete.len() as u64,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TailPolicy {
    pub interval: Duration,
    pub idle: Duration,
}

/// Deliver new lines of the current log file until the attempt stops.
///
/// `current` belongs to one attempt and is filled by its identification;
/// until then the activity idles. Every failure is logged and swallowed.
/// The offset marker is removed on exit.
pub(crate) async fn run(
    current: Arc<Mutex<Option<LogCursor>>>,
    signal: AttemptSignal,
    policy: TailPolicy,
    handler: Arc<dyn ClientHandler>,
) {
    loop {
        let cursor = current.lock().clone();
        let wait = match cursor {
            None => policy.idle,
            Some(cursor) => {
                tail_once(&cursor, &signal, handler.as_ref()).await;
                policy.interval
            }
        };
        if !signal.pause(wait).await {
            break;
        }
    }

    let cursor = current.lock().clone();
    if let Some(cursor) = cursor {
        if let Err(e) = cursor.reset() {
            tracing::debug!(path = %cursor.offset_path().display(), error = %e, "could not remove log offset");
        }
    }
    tracing::trace!("log tailer exited");
}

async fn tail_once(cursor: &LogCursor, signal: &AttemptSignal, handler: &dyn ClientHandler) {
    let reader = cursor.clone();
    let chunk = match tokio::task::spawn_blocking(move || reader.read_new_lines()).await {
        Ok(Ok(chunk)) => chunk,
        Ok(Err(e)) => {
            tracing::debug!(path = %cursor.log_path().display(), error = %e, "log read failed");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "log read task failed");
            return;
        }
    };

    for line in &chunk.lines {
        if !signal.is_running() {
            // Undelivered lines are read again next session.
            return;
        }
        handler.on_core_log_entry(line).await;
    }

    if let Err(e) = cursor.commit(chunk.next_offset) {
        tracing::warn!(path = %cursor.offset_path().display(), error = %e, "could not persist log offset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use tokio::sync::mpsc;

    struct Lines(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl ClientHandler for Lines {
        async fn on_core_log_entry(&self, line: &str) {
            let _ = self.0.send(line.to_string());
        }
    }

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no log line delivered")
            .unwrap()
    }

    #[tokio::test]
    async fn tailer_waits_for_its_cursor_and_removes_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), b"alpha\nbeta\n");
        let slot = Arc::new(Mutex::new(None));
        let signal = AttemptSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(
            slot.clone(),
            signal.clone(),
            TailPolicy {
                interval: Duration::from_millis(10),
                idle: Duration::from_millis(10),
            },
            Arc::new(Lines(tx)),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "nothing is tailed before a cursor is installed");

        let cursor = LogCursor::new(&path, 4);
        *slot.lock() = Some(cursor.clone());
        assert_eq!(next_line(&mut rx).await, "alpha");
        assert_eq!(next_line(&mut rx).await, "beta");

        // Progress is recorded while the session lives.
        tokio::time::timeout(Duration::from_secs(5), async {
            while cursor.offset() != 11 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("offset never committed");

        signal.break_transient();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("tailer did not exit")
            .unwrap();
        assert!(!cursor.offset_path().exists());
    }

    fn write_log(dir: &Path, content: &[u8]) -> PathBuf {
        let path = dir.join("hid-io-core.rCURRENT.log");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn marker_path_carries_uid() {
        let cursor = LogCursor::new("/var/log/core.log", 42);
        assert_eq!(cursor.offset_path(), Path::new("/var/log/core.log.offset.42"));
    }

    #[test]
    fn reads_only_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), b"one\ntwo\nthr");
        let cursor = LogCursor::new(&path, 1);

        let chunk = cursor.read_new_lines().unwrap();
        assert_eq!(chunk.lines, vec!["one", "two"]);
        assert_eq!(chunk.next_offset, 8);
        cursor.commit(chunk.next_offset).unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"ee\nfour\n").unwrap();

        let chunk = cursor.read_new_lines().unwrap();
        assert_eq!(chunk.lines, vec!["three", "four"]);
    }

    #[test]
    fn reset_replays_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        // 20 lines of 10 bytes each: 200 bytes.
        let content: Vec<u8> = (0..20)
            .flat_map(|i| format!("line {i:04}\n").into_bytes())
            .collect();
        assert_eq!(content.len(), 200);
        let path = write_log(dir.path(), &content);

        let cursor = LogCursor::new(&path, 7);
        cursor.commit(120).unwrap();
        assert_eq!(cursor.read_new_lines().unwrap().lines.len(), 8);

        cursor.reset().unwrap();
        assert!(!cursor.offset_path().exists());
        let chunk = cursor.read_new_lines().unwrap();
        assert_eq!(chunk.lines.len(), 20);
        assert_eq!(chunk.lines[0], "line 0000");
        assert_eq!(chunk.next_offset, 200);
    }

    #[test]
    fn truncated_file_restarts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), b"short\n");
        let cursor = LogCursor::new(&path, 3);
        cursor.commit(500).unwrap();

        let chunk = cursor.read_new_lines().unwrap();
        assert_eq!(chunk.lines, vec!["short"]);
        assert_eq!(chunk.next_offset, 6);
    }

    #[test]
    fn reset_without_marker_is_fine() {
        let cursor = LogCursor::new("/nonexistent/core.log", 9);
        cursor.reset().unwrap();
        assert_eq!(cursor.offset(), 0);
    }
}
