//! Unattended reservation recording for an ISDB TV host application.
//!
//! The crate is host-agnostic: a host adapter implements the collaborator
//! traits in [`host`] and drives a [`Scheduler`], either directly or through
//! a [`TickDriver`].
//!
//! Each tick the scheduler
//! 1. advances the broadcast-aligned clock ([`clock`]),
//! 2. scans one search query for new matches ([`query`]),
//! 3. reconciles reservations with program data ([`follow_up`]),
//! 4. steps the recording state machine ([`recording`]),
//! 5. and declares whether the system must stay awake ([`keep_awake`]).

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod follow_up;
pub mod host;
pub mod keep_awake;
pub mod logging;
pub mod query;
pub mod recording;
pub mod scheduler;
pub mod store;
pub mod tot;

pub use error::{HostError, Result, SchedulerError};
pub use scheduler::{Scheduler, TickDriver, TickReport};
