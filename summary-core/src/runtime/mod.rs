//! Runtime support for the summary manager

pub mod dispose;

pub use dispose::DisposeSignal;
