//! Time effect handlers

mod real;

pub use real::RealTimeHandler;
