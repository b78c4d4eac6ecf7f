//! Ice2Ocean batch builder: turns labeled uploads into derived products.

pub mod admin;
pub mod config;
pub mod pipeline;
pub mod processor;

pub use config::BuilderConfig;
pub use pipeline::{partition_round_robin, BatchDriver, BatchReport, Worker, WorkerReport};
pub use processor::{PreviewProcessor, Processor, StepError};
