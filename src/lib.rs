#![allow(non_snake_case)]
#![allow(clippy::too_many_arguments)]

// Declare the modules that form the library's public API (or internal structure)
// Using `pub mod` makes them accessible from the binaries using `use RecTriage::module_name;`
pub mod classification;
pub mod client;
pub mod config;
pub mod data_model;
pub mod error;
pub mod pipeline;
pub mod utils;

// Re-export the types callers touch on every run.
pub use data_model::{BatchJob, Category, ClassificationResult, Priority, ProcessingStatus};
pub use error::{ProcessingError, Result};
pub use pipeline::batch_processor::BatchProcessor;
