//! logger.rs
//! Asynchronous CSV recorder for telemetry frames.
//!
//! - Producers enqueue [`LogRecord`]s without blocking (bounded channel, drop on full)
//! - A consumer thread owns the file and writes one row per record
//! - `stop()` drains whatever is queued, flushes, closes and returns the path
//!
//! Row layout: `ts_wall`, every frame field in schema order (6 decimals),
//! then `throttle_pwm` when the logger was started with command context.

use chrono::Local;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use csv::Writer;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use log::{debug, error, info, warn};

use crate::error::LoggerError;
use crate::telemetry::{FrameSchema, TelemetryFrame};

const LOG_CAPACITY: usize = 4096;
/// Consumer wakes at least this often to notice a stop request.
const RECV_WAIT: Duration = Duration::from_millis(500);
const FLUSH_EVERY: u64 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub wall_clock: SystemTime,
    pub frame: TelemetryFrame,
    /// Commanded PWM at the time the frame was pulled.
    pub context: Option<u16>,
}

impl LogRecord {
    pub fn new(frame: TelemetryFrame, context: Option<u16>) -> Self {
        Self {
            wall_clock: SystemTime::now(),
            frame,
            context,
        }
    }

    fn to_row(&self, with_context: bool) -> Vec<String> {
        let ts = self
            .wall_clock
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let mut row = Vec::with_capacity(self.frame.values().len() + 2);
        row.push(format!("{:.6}", ts));
        row.extend(self.frame.values().iter().map(|v| format!("{:.6}", v)));
        if with_context {
            row.push(self.context.map(|pwm| pwm.to_string()).unwrap_or_default());
        }
        row
    }
}

/// Keeps only characters that are safe in a file name on every platform.
pub fn sanitize_prefix(prefix: &str) -> String {
    let clean: String = prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if clean.is_empty() { "log".to_string() } else { clean }
}

fn header(schema: FrameSchema, with_context: bool) -> Vec<&'static str> {
    let mut cols = vec!["ts_wall"];
    cols.extend_from_slice(schema.field_names());
    if with_context {
        cols.push("throttle_pwm");
    }
    cols
}

pub struct AsyncLogger {
    tx: Sender<LogRecord>,
    stop_flag: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    dropped: AtomicU64,
    path: PathBuf,
    handle: Option<JoinHandle<Result<(), LoggerError>>>,
}

impl AsyncLogger {
    /// Creates `dir` if needed, writes the header row and starts the consumer.
    pub fn start(
        dir: &Path,
        prefix: &str,
        schema: FrameSchema,
        with_context: bool,
    ) -> Result<Self, LoggerError> {
        fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.csv", sanitize_prefix(prefix), stamp));
        let file = BufWriter::new(File::create(&path)?);
        Self::with_writer(file, path, schema, with_context)
    }

    /// Records into `sink`; `path` is only reported back by `path()`/`stop()`.
    pub(crate) fn with_writer<W: Write + Send + 'static>(
        sink: W,
        path: PathBuf,
        schema: FrameSchema,
        with_context: bool,
    ) -> Result<Self, LoggerError> {
        let mut wtr = Writer::from_writer(sink);
        wtr.write_record(header(schema, with_context))?;
        wtr.flush()?;

        let (tx, rx) = channel::bounded(LOG_CAPACITY);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let written = Arc::new(AtomicU64::new(0));

        let handle = {
            let stop_flag = stop_flag.clone();
            let written = written.clone();
            thread::Builder::new()
                .name("csv-logger".into())
                .spawn(move || consume(wtr, &rx, &stop_flag, &written, with_context))?
        };

        info!("[Logger] recording to {}", path.display());
        Ok(Self {
            tx,
            stop_flag,
            written,
            dropped: AtomicU64::new(0),
            path,
            handle: Some(handle),
        })
    }

    /// Non-blocking enqueue; returns `false` (and counts a drop) when full.
    pub fn enqueue(&self, record: LogRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Extra producer handle for threads that record on their own.
    pub fn sender(&self) -> Sender<LogRecord> {
        self.tx.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drains queued records, closes the file and returns its path.
    pub fn stop(mut self) -> Result<PathBuf, LoggerError> {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => error!("[Logger] consumer thread panicked"),
            }
        }
        info!(
            "[Logger] saved {} rows to {}",
            self.written_count(),
            self.path.display()
        );
        Ok(self.path.clone())
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Writes rows until stopped; the first row or flush failure is returned
/// after the queue is drained.
fn consume<W: Write>(
    mut wtr: Writer<W>,
    rx: &Receiver<LogRecord>,
    stop_flag: &AtomicBool,
    written: &AtomicU64,
    with_context: bool,
) -> Result<(), LoggerError> {
    let mut first_error: Option<LoggerError> = None;
    let mut write = |wtr: &mut Writer<W>, record: &LogRecord| {
        match wtr.write_record(record.to_row(with_context)) {
            Ok(()) => {
                let n = written.fetch_add(1, Ordering::Relaxed) + 1;
                if n % FLUSH_EVERY == 0 {
                    if let Err(e) = wtr.flush() {
                        warn!("[Logger] periodic flush failed: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e.into());
                        }
                    }
                }
            }
            Err(e) => {
                error!("[Logger] row dropped: {}", e);
                if first_error.is_none() {
                    first_error = Some(e.into());
                }
            }
        }
    };

    loop {
        match rx.recv_timeout(RECV_WAIT) {
            Ok(record) => write(&mut wtr, &record),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if stop_flag.load(Ordering::Acquire) {
            break;
        }
    }

    // everything enqueued before stop still lands in the file
    for record in rx.try_iter() {
        write(&mut wtr, &record);
    }
    drop(write);

    wtr.flush()?;
    debug!("[Logger] consumer exited.");
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
