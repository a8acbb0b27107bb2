pub mod engine;
pub mod fasta;
pub mod fetcher;
pub mod pipeline;
pub mod storage;

pub use engine::{EngineStatus, PredictionEngine};
pub use fetcher::{ObjectFetcher, ScratchFile};
pub use pipeline::{PipelineError, PredictionPipeline};
pub use storage::{GcsObjectStore, LocalObjectStore, ObjectStore};
