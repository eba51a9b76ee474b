//! Failure handling for remote calls: bounded retry and circuit breaking.

pub mod retry;
pub mod circuit_breaker;
