pub mod downloadable;
pub mod envelope;
