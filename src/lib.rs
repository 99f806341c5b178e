//! MirrorView - API backend with request admission control
//!
//! Every request is size-checked and rate limited per client and per scope
//! before it reaches a handler. Rate limit state is process-local and kept in
//! fixed-window counters; text generation and feedback storage are external
//! collaborators reached through the traits in [`services`].

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod services;
