//! Asynchronous, day/line-rotated logger.
//!
//! A dedicated writer thread drains a bounded queue of pre-formatted lines and
//! appends them to the current log file through a [`BufWriter`], rotating to a new
//! file when the wall-clock day changes or the running line count crosses a multiple
//! of the configured split size. This *is* the crate's logging facility, not a
//! backend for one: callers hold a cloned [`Logger`] handle and call its four level
//! methods directly rather than going through a generic logging crate (§10.1).
//!
//! Lines are capped at `log_buf` bytes before being queued, mirroring the fixed
//! per-line format buffer the mechanism this is grounded on allocates once at init
//! and reuses for every `write_log` call. Writes themselves are not flushed after
//! every line — an explicit [`Logger::flush`] forces the writer's buffer, and the
//! file's own OS buffer, to disk, the same separation the mechanism this is grounded
//! on draws between `write_log` (buffered, via `fputs`) and its own public `flush`
//! (`fflush`).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use chrono::{Datelike, Local, Timelike};

use crate::queue::BoundedQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "[debug]",
            Level::Info => "[info]",
            Level::Warn => "[warn]",
            Level::Error => "[error]",
        }
    }
}

/// One item on the writer thread's queue: either a formatted line, or a request to
/// flush everything written so far, with a handle the caller can block on.
enum LogMsg {
    Line(String),
    Flush(Arc<FlushWait>),
}

/// A one-shot rendezvous the writer thread signals once it has flushed past the
/// point a [`Logger::flush`] call was made. FIFO queue ordering guarantees the flush
/// request is only popped after every line queued ahead of it.
#[derive(Debug, Default)]
struct FlushWait {
    done: Mutex<bool>,
    cond: Condvar,
}

impl FlushWait {
    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = self.cond.wait(done).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn signal(&self) {
        *self.done.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }
}

/// Shared logger handle. Cloning is cheap; every clone writes to the same queue and the
/// same writer thread.
#[derive(Debug, Clone)]
pub struct Logger(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    queue: BoundedQueue<LogMsg>,
    lines_written: AtomicU64,
    split_lines: u64,
    log_buf: usize,
    dir: PathBuf,
    stem: String,
}

impl Logger {
    /// Opens today's log file and spawns the writer thread. The thread is detached: it
    /// runs until the queue's last sender drops, which only happens when every `Logger`
    /// handle (and the writer's own internal clone) goes out of scope.
    pub fn init(
        dir: impl Into<PathBuf>,
        stem: impl Into<String>,
        log_buf: usize,
        queue_capacity: usize,
        split_lines: u64,
    ) -> std::io::Result<Self> {
        let dir = dir.into();
        let stem = stem.into();
        std::fs::create_dir_all(&dir)?;
        let file = BufWriter::new(open_for_day(&dir, &stem, None)?);

        let inner = Arc::new(Inner {
            queue: BoundedQueue::new(queue_capacity.max(1)),
            lines_written: AtomicU64::new(0),
            split_lines: split_lines.max(1),
            log_buf: log_buf.max(1),
            dir,
            stem,
        });

        let writer_inner = Arc::clone(&inner);
        thread::Builder::new()
            .name("holt-logger".into())
            .spawn(move || writer_loop(writer_inner, file))
            .expect("failed to spawn logger thread");

        Ok(Logger(inner))
    }

    fn log(&self, level: Level, line: &str) {
        let now = Local::now();
        let mut formatted = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06} {} {}",
            now.year(), now.month(), now.day(),
            now.hour(), now.minute(), now.second(),
            now.timestamp_subsec_micros(),
            level.tag(), line,
        );
        truncate_to_byte_len(&mut formatted, self.0.log_buf);

        if !self.0.queue.push(LogMsg::Line(formatted)) {
            eprintln!("holt: log queue full, dropping line: {line}");
        }
    }

    pub fn debug(&self, line: impl AsRef<str>) {
        self.log(Level::Debug, line.as_ref());
    }

    pub fn info(&self, line: impl AsRef<str>) {
        self.log(Level::Info, line.as_ref());
    }

    pub fn warn(&self, line: impl AsRef<str>) {
        self.log(Level::Warn, line.as_ref());
    }

    pub fn error(&self, line: impl AsRef<str>) {
        self.log(Level::Error, line.as_ref());
    }

    /// Blocks until every line queued before this call has been written and the
    /// writer's buffer has been forced out to the OS and synced to disk. Queues a
    /// flush marker rather than flushing from the caller's thread, so ordering with
    /// respect to already-queued lines is preserved.
    pub fn flush(&self) {
        let wait = Arc::new(FlushWait::default());
        while !self.0.queue.push(LogMsg::Flush(Arc::clone(&wait))) {
            thread::yield_now();
        }
        wait.wait();
    }
}

fn truncate_to_byte_len(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

fn open_for_day(dir: &Path, stem: &str, seq: Option<u64>) -> std::io::Result<File> {
    let today = Local::now();
    let name = match seq {
        None => format!("{:04}_{:02}_{:02}_{}", today.year(), today.month(), today.day(), stem),
        Some(s) => format!("{:04}_{:02}_{:02}_{}.{}", today.year(), today.month(), today.day(), stem, s),
    };
    OpenOptions::new().create(true).append(true).open(dir.join(name))
}

/// Flushes the writer's userspace buffer and fsyncs the underlying file, forcing
/// queued bytes all the way to disk rather than just out to the OS page cache.
fn sync_to_disk(file: &mut BufWriter<File>) {
    if let Err(e) = file.flush() {
        eprintln!("holt: failed to flush log writer: {e}");
    }
    if let Err(e) = file.get_ref().sync_data() {
        eprintln!("holt: failed to sync log file to disk: {e}");
    }
}

fn writer_loop(inner: Arc<Inner>, mut file: BufWriter<File>) {
    let mut day = Local::now().day();

    while let Some(msg) = inner.queue.pop() {
        let line = match msg {
            LogMsg::Line(line) => line,
            LogMsg::Flush(wait) => {
                sync_to_disk(&mut file);
                wait.signal();
                continue;
            }
        };

        let count = inner.lines_written.fetch_add(1, Ordering::Relaxed) + 1;
        let today = Local::now().day();

        if today != day {
            day = today;
            sync_to_disk(&mut file);
            match open_for_day(&inner.dir, &inner.stem, None) {
                Ok(f) => file = BufWriter::new(f),
                Err(e) => eprintln!("holt: failed to rotate log file for new day: {e}"),
            }
        } else if count % inner.split_lines == 0 {
            sync_to_disk(&mut file);
            match open_for_day(&inner.dir, &inner.stem, Some(count / inner.split_lines)) {
                Ok(f) => file = BufWriter::new(f),
                Err(e) => eprintln!("holt: failed to open split log file: {e}"),
            }
        }

        if let Err(e) = writeln!(file, "{line}") {
            eprintln!("holt: failed to write log line: {e}");
        }
    }
}
