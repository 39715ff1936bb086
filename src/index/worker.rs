//! Operation orchestration.
//!
//! The worker serializes externally requested operations — full index,
//! partial index, file check — so at most one runs at a time. Results
//! and progress travel over a fire-and-forget event channel; fatal,
//! user-facing conditions go through the injected notifier so the host
//! can route them to its UI thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::IndexConfig;
use crate::encoding::{BomDetector, EncodingDetector, TextCodec};

use super::checker::{check_file_changes, MonitoredFileStatus};
use super::pipeline::IndexOperation;
use super::store::IndexStore;

/// Terminal result of an indexing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStatus {
    Successful,
    Interrupted,
}

/// Notifications published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Emitted when the rounded percentage changes; 0 at operation
    /// start, 100 on the empty-file fast path.
    IndexingProgressed(i32),
    /// Exactly once per indexing operation.
    IndexingFinished(LoadingStatus),
    /// Exactly once per check operation.
    FileCheckFinished(MonitoredFileStatus),
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Indexing,
    Checking,
    Destroyed,
}

/// Cooperative interrupt flag for an indexing run.
///
/// Clones share the flag; the reader polls it at every block boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptRequest {
    flag: Arc<AtomicBool>,
}

impl InterruptRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Channel for user-facing fatal messages, forwarded by the host to its
/// main thread.
pub type Notifier = Arc<dyn Fn(&str) + Send + Sync>;

/// Fire-and-forget event publisher; a vanished receiver never fails an
/// operation.
#[derive(Clone)]
pub(crate) struct EventSender {
    events: Sender<WorkerEvent>,
}

impl EventSender {
    pub fn indexing_progressed(&self, progress: i32) {
        let _ = self.events.send(WorkerEvent::IndexingProgressed(progress));
    }

    pub fn indexing_finished(&self, status: LoadingStatus) {
        let _ = self.events.send(WorkerEvent::IndexingFinished(status));
    }

    pub fn file_check_finished(&self, status: MonitoredFileStatus) {
        let _ = self.events.send(WorkerEvent::FileCheckFinished(status));
    }
}

/// The three operation kinds share the run-on-worker machinery and
/// differ only in body.
enum Operation {
    FullIndex { forced_encoding: Option<TextCodec> },
    PartialIndex,
    CheckChanges,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::FullIndex { .. } => "full index",
            Operation::PartialIndex => "partial index",
            Operation::CheckChanges => "file check",
        }
    }
}

/// Single-owner orchestrator for index and check operations.
pub struct IndexWorker {
    file_name: Mutex<PathBuf>,
    store: IndexStore,
    config: IndexConfig,
    detector: Arc<dyn EncodingDetector>,
    events: EventSender,
    notifier: Notifier,
    interrupt: InterruptRequest,
    running: Mutex<Option<(WorkerState, JoinHandle<()>)>>,
    destroyed: AtomicBool,
}

impl IndexWorker {
    pub fn new(store: IndexStore, config: IndexConfig, events: Sender<WorkerEvent>) -> Self {
        Self {
            file_name: Mutex::new(PathBuf::new()),
            store,
            config,
            detector: Arc::new(BomDetector),
            events: EventSender { events },
            notifier: Arc::new(|message: &str| error!("{message}")),
            interrupt: InterruptRequest::new(),
            running: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Replace the encoding detector (tests force specific codecs).
    pub fn with_detector(mut self, detector: Arc<dyn EncodingDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the fatal-message sink.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Bind the worker to a file; subsequent operations capture the
    /// path at request time.
    pub fn attach_file(&self, file_name: &Path) {
        *self.file_name.lock() = file_name.to_path_buf();
    }

    pub fn state(&self) -> WorkerState {
        if self.destroyed.load(Ordering::SeqCst) {
            return WorkerState::Destroyed;
        }
        match &*self.running.lock() {
            Some((state, _)) => *state,
            None => WorkerState::Idle,
        }
    }

    /// Clear the index and rebuild from offset 0.
    pub fn index_all(&self, forced_encoding: Option<TextCodec>) {
        debug!("full index requested");
        self.start(WorkerState::Indexing, Operation::FullIndex { forced_encoding });
    }

    /// Append to the index from the previously indexed size.
    pub fn index_additional_lines(&self) {
        debug!("partial index requested");
        self.start(WorkerState::Indexing, Operation::PartialIndex);
    }

    /// Classify the on-disk file against the stored fingerprint.
    pub fn check_file_changes(&self) {
        debug!("file check requested");
        self.start(WorkerState::Checking, Operation::CheckChanges);
    }

    /// Ask the in-flight indexing run to stop at the next block
    /// boundary.
    pub fn interrupt(&self) {
        info!("indexing interrupt requested");
        self.interrupt.set();
    }

    /// Block until the in-flight operation (if any) finishes.
    pub fn wait_for_done(&self) {
        let finished = self.running.lock().take();
        if let Some((_, handle)) = finished {
            let _ = handle.join();
        }
        self.interrupt.clear();
    }

    fn start(&self, state: WorkerState, operation: Operation) {
        let mut running = self.running.lock();

        // A new request waits for the prior operation to complete.
        if let Some((_, handle)) = running.take() {
            let _ = handle.join();
        }
        self.interrupt.clear();

        let runner = OperationRunner {
            operation,
            file_name: self.file_name.lock().clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            interrupt: self.interrupt.clone(),
            detector: Arc::clone(&self.detector),
            events: self.events.clone(),
            notifier: Arc::clone(&self.notifier),
        };

        match thread::Builder::new()
            .name("logdex-worker".into())
            .spawn(move || runner.run_guarded())
        {
            Ok(handle) => *running = Some((state, handle)),
            Err(spawn_error) => {
                let message = format!("cannot start worker thread: {spawn_error}");
                error!("{message}");
                (self.notifier)(&message);
                match state {
                    WorkerState::Checking => self
                        .events
                        .file_check_finished(MonitoredFileStatus::Truncated),
                    _ => self.events.indexing_finished(LoadingStatus::Interrupted),
                }
            }
        }
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        self.interrupt.set();
        self.wait_for_done();
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

struct OperationRunner {
    operation: Operation,
    file_name: PathBuf,
    store: IndexStore,
    config: IndexConfig,
    interrupt: InterruptRequest,
    detector: Arc<dyn EncodingDetector>,
    events: EventSender,
    notifier: Notifier,
}

impl OperationRunner {
    /// Run the operation with a panic guard: an escaped panic is
    /// formatted, reported through the notifier, and turned into a
    /// terminal failure event — never propagated to the caller.
    fn run_guarded(self) {
        let operation_name = self.operation.name();
        let is_check = matches!(self.operation, Operation::CheckChanges);
        let store = self.store.clone();
        let config = self.config.clone();
        let events = self.events.clone();
        let notifier = Arc::clone(&self.notifier);

        if catch_unwind(AssertUnwindSafe(|| self.run())).is_err() {
            let message = format!("{operation_name} operation panicked");
            error!("{message}");
            (notifier)(&message);

            if is_check {
                events.file_check_finished(MonitoredFileStatus::Truncated);
            } else {
                store.write().clear(&config);
                events.indexing_finished(LoadingStatus::Interrupted);
            }
        }
    }

    fn run(&self) {
        match &self.operation {
            Operation::FullIndex { forced_encoding } => {
                info!(file = %self.file_name.display(), "full index started");
                self.events.indexing_progressed(0);

                {
                    let mut data = self.store.write();
                    data.clear(&self.config);
                    data.force_encoding(*forced_encoding);
                }

                self.run_indexing(0);
            }
            Operation::PartialIndex => {
                let initial_position = self.store.read().get_indexed_size();
                info!(
                    file = %self.file_name.display(),
                    initial_position,
                    "partial index started"
                );
                self.events.indexing_progressed(0);

                self.run_indexing(initial_position);
            }
            Operation::CheckChanges => {
                info!(file = %self.file_name.display(), "file check started");
                let status = check_file_changes(&self.file_name, &self.store, &self.config);
                info!(?status, "file check finished");
                self.events.file_check_finished(status);
            }
        }
    }

    fn run_indexing(&self, initial_position: u64) {
        let operation = IndexOperation {
            file_name: self.file_name.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            interrupt: self.interrupt.clone(),
            detector: Arc::clone(&self.detector),
            events: self.events.clone(),
            notifier: Arc::clone(&self.notifier),
        };

        let status = match operation.do_index(initial_position) {
            Ok(()) if self.interrupt.is_set() => LoadingStatus::Interrupted,
            Ok(()) => LoadingStatus::Successful,
            Err(index_error) => {
                let message = format!("indexing failed: {index_error:#}");
                error!("{message}");
                (self.notifier)(&message);
                self.store.write().clear(&self.config);
                LoadingStatus::Interrupted
            }
        };

        info!(?status, "indexing finished");
        self.events.indexing_finished(status);
    }
}
