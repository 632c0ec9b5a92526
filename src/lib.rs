//! sandhost — ephemeral per-user dev sandbox lifecycle manager.
//!
//! Provisions, tracks, and tears down one development sandbox per host
//! instance: a scaffolded project directory under the sandbox root, a dev
//! server process bound to an allocated port, and an nginx route exposing
//! that port under a per-user subdomain.
//!
//! The public entry point is [`orchestrator::LifecycleOrchestrator`], which
//! serializes `create` / `kill` / `status` / `restart` and the
//! collaborator file/command surface through a single lifecycle lock. OS
//! interaction goes through two narrow seams, [`runner::ProcessRunner`]
//! and [`proxy::ProxyController`], so the lifecycle logic runs unchanged
//! against the real host or test doubles.

pub mod config;
pub mod error;
pub mod fsx;
pub mod health;
pub mod installer;
pub mod orchestrator;
pub mod ports;
pub mod process;
pub mod provision;
pub mod proxy;
pub mod registry;
pub mod runner;
pub mod scaffold;
