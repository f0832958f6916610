//! Transaction submission pipeline.

mod processor;
mod types;

pub use processor::*;
pub use types::*;
