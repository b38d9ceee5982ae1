pub mod coerce;
pub mod columns;
pub mod context;
pub mod csv_source;
pub mod error;
pub mod guard;
pub mod hasher;
pub mod pipeline;
pub mod profile;
pub mod record;
pub mod report;
pub mod rows;
pub mod sequencer;
pub mod structure;

pub use pipeline::{CsvFeeder, ImportOptions};
