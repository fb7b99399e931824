//! Guardrail - Resilience Middleware
//!
//! This crate protects a service and its dependencies with named circuit
//! breakers and a sliding-window rate limiter. Rate limit state is shared
//! through Redis when it is reachable and falls back to per-process
//! accounting when it is not, so limiting never fails closed.

pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
