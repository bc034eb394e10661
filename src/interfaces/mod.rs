pub mod handlers;
pub mod reporting;
pub mod scheduler;
pub mod transport;
