//! Countgate - Distributed Limit-Count Admission Control
//!
//! This crate enforces several independent count-per-window rules on each
//! request. Counters live in a shared Redis instance and every request
//! evaluates all of its rules in a single atomic script call, so any number
//! of stateless gateway processes can share quotas without talking to each
//! other.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
