//! sitewatch - website uptime monitoring.
//!
//! Targets live in a [`registry::Registry`] backed by a [`store::TargetStore`].
//! The [`scheduler::Scheduler`] fans checks out through the
//! [`coordinator::CheckCoordinator`], which keeps at most one probe in flight
//! per target and raises downtime notifications. [`monitor::Monitor`] is the
//! client surface that [`web`] exposes over HTTP.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod web;

#[cfg(test)]
mod test_support;
