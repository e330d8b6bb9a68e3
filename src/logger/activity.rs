//! Activity logger: a dedicated thread owns the `JsonlWriter`; pipeline stages
//! send `ActivityEvent`s through a bounded crossbeam channel.
//!
//! `try_send()` keeps the pipeline from ever blocking on logging back-pressure;
//! overflow is counted and reported by the logger thread on its next write.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, SweepError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the cleanup pipeline.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        root: PathBuf,
        mode: &'static str,
        config_hash: String,
    },
    RunCompleted {
        mode: &'static str,
        exit_code: i32,
        candidates: usize,
        failed: usize,
    },
    ScanWarning {
        path: PathBuf,
        reason: String,
    },
    ProtectionBuilt {
        tracked: usize,
        referenced: usize,
        allowlisted: usize,
        unresolved: usize,
    },
    CandidatesSelected {
        count: usize,
        total_bytes: u64,
    },
    ArchiveWritten {
        archive: PathBuf,
        entries: usize,
        skipped: usize,
        total_bytes: u64,
    },
    ArchiveFailed {
        code: String,
        message: String,
    },
    FileDeleted {
        path: PathBuf,
        size_bytes: u64,
    },
    FileQuarantined {
        path: PathBuf,
        destination: PathBuf,
        size_bytes: u64,
    },
    ActionFailed {
        path: PathBuf,
        code: String,
        message: String,
    },
    RestoreCompleted {
        archive: PathBuf,
        restored: usize,
        skipped: usize,
    },
    Cancelled {
        stage: &'static str,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply-cloneable sender side of the activity log.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Option<Sender<ActivityEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle that discards every event (no log path configured).
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking send; a full channel drops the event and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and stop.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ActivityEvent::Shutdown);
        }
    }
}

/// Spawn the logger thread writing to `config`.
pub fn spawn_logger(
    config: JsonlConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx: Some(tx),
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("rsweep-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| SweepError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            jsonl.write_entry(
                &LogEntry::new(EventType::Error, Severity::Warning)
                    .with_details(format!("{lost} activity events dropped under back-pressure")),
            );
        }
        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.sync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            root,
            mode,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStarted, Severity::Info)
                .with_path(root)
                .with_details(format!("config_hash={config_hash}"));
            e.mode = Some((*mode).to_string());
            e
        }
        ActivityEvent::RunCompleted {
            mode,
            exit_code,
            candidates,
            failed,
        } => {
            let severity = if *failed == 0 {
                Severity::Info
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::RunCompleted, severity)
                .with_details(format!("exit_code={exit_code} failed={failed}"));
            e.mode = Some((*mode).to_string());
            e.count = Some(*candidates as u64);
            e.ok = Some(*exit_code == 0);
            e
        }
        ActivityEvent::ScanWarning { path, reason } => {
            LogEntry::new(EventType::ScanWarning, Severity::Warning)
                .with_path(path)
                .with_details(reason.clone())
        }
        ActivityEvent::ProtectionBuilt {
            tracked,
            referenced,
            allowlisted,
            unresolved,
        } => LogEntry::new(EventType::ProtectionBuilt, Severity::Info).with_details(format!(
            "tracked={tracked} referenced={referenced} allowlisted={allowlisted} unresolved={unresolved}"
        )),
        ActivityEvent::CandidatesSelected { count, total_bytes } => {
            let mut e = LogEntry::new(EventType::CandidatesSelected, Severity::Info);
            e.count = Some(*count as u64);
            e.size = Some(*total_bytes);
            e
        }
        ActivityEvent::ArchiveWritten {
            archive,
            entries,
            skipped,
            total_bytes,
        } => {
            let mut e = LogEntry::new(EventType::ArchiveWritten, Severity::Info)
                .with_details(format!("skipped={skipped}"));
            e.archive = Some(archive.to_string_lossy().into_owned());
            e.count = Some(*entries as u64);
            e.size = Some(*total_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ArchiveFailed { code, message } => {
            let mut e = LogEntry::new(EventType::ArchiveFailed, Severity::Error);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::FileDeleted { path, size_bytes } => {
            let mut e = LogEntry::new(EventType::FileDeleted, Severity::Info).with_path(path);
            e.size = Some(*size_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileQuarantined {
            path,
            destination,
            size_bytes,
        } => {
            let mut e = LogEntry::new(EventType::FileQuarantined, Severity::Info)
                .with_path(path)
                .with_details(format!("destination={}", destination.display()));
            e.size = Some(*size_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ActionFailed {
            path,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::ActionFailed, Severity::Warning).with_path(path);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::RestoreCompleted {
            archive,
            restored,
            skipped,
        } => {
            let mut e = LogEntry::new(EventType::RestoreCompleted, Severity::Info)
                .with_details(format!("skipped={skipped}"));
            e.archive = Some(archive.to_string_lossy().into_owned());
            e.count = Some(*restored as u64);
            e.ok = Some(true);
            e
        }
        ActivityEvent::Cancelled { stage } => LogEntry::new(EventType::Cancelled, Severity::Warning)
            .with_details(format!("before stage {stage}")),
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Error);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => {
            LogEntry::new(EventType::RunCompleted, Severity::Info).with_details("shutdown")
        }
    }
}
