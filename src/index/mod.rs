//! The line index: shared state, the indexing pipeline, change
//! detection and the worker that orchestrates them.

mod checker;
mod digest;
mod parse;
mod pipeline;
mod position;
mod store;
mod worker;

pub use checker::MonitoredFileStatus;
pub use digest::{FileDigest, IndexedHash};
pub use parse::TAB_STOP;
pub use pipeline::INDEXING_BLOCK_SIZE;
pub use position::{FastLinePositionArray, LinePositionArray};
pub use store::{IndexStore, IndexingData};
pub use worker::{
    IndexWorker, InterruptRequest, LoadingStatus, Notifier, WorkerEvent, WorkerState,
};
