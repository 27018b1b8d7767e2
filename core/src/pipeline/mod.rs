// conversion_relay/src/pipeline/mod.rs

//! A small named-step pipeline. Conversion orchestration is expressed as one.

pub mod definition;
pub mod execution;

pub use definition::Pipeline;
