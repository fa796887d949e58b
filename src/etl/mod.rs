//! Core extract → transform → publish flow
//!
//! [`Extractor`] runs a source's query on a pooled connection,
//! [`Transformer`] implementations shape the rows, and [`Pipeline`] ties
//! both to the shared publisher for one source.

mod extract;
mod pipeline;
mod transform;

pub use extract::{Cell, ExtractionResult, Extractor, RowSet};
pub use pipeline::{Pipeline, PipelineState, SourceOutcome, status_line};
pub use transform::Transformer;
