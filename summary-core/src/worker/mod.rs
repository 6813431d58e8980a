//! Summarizer worker boundary
//!
//! Traits the coordinator uses to create, run and signal a summarizer, plus
//! an in-memory implementation for tests and simulation.

pub mod factory;
pub mod mock;
pub mod summarizer;

pub use factory::{Loader, LoaderResponse, LoaderSummarizerFactory, SummarizerFactory, SummarizerRequest};
pub use mock::{MockSummarizer, MockSummarizerFactory};
pub use summarizer::{SummarizerHandle, SummarizingWarning};
