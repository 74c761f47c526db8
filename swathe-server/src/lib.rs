//! Swathe Server
//!
//! Native runtime around the `swathe-core` engine: per-vehicle trail
//! sessions with commit cadence and retry, the trail store client, the
//! multi-vehicle coverage synchronizer, position feed ingestion (live HTTP
//! or replay from file), and a small REST API.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use thiserror::Error;

use swathe_core::trail::TransitionError;
use swathe_core::types::{OperationId, VehicleId};

pub mod feed;
pub mod fleet;
pub mod session;
pub mod store;
pub mod sync;
pub mod web;

pub use fleet::Fleet;
pub use session::{SessionConfig, TrailSession};
pub use store::{MemoryTrailStore, StoreError, TrailStore};
pub use sync::{SyncView, TrailSyncer};

/// Command line arguments.
#[derive(Parser, Clone, Debug)]
#[command(name = "swathe-server", about = "Field coverage tracking server")]
pub struct Args {
    /// Address for the REST API
    #[arg(long, default_value = "127.0.0.1:6520")]
    pub listen: String,

    /// Seconds between periodic commits
    #[arg(long, default_value_t = 5)]
    pub commit_interval: u64,

    /// Buffered samples that trigger an early commit
    #[arg(long, default_value_t = 50)]
    pub commit_batch: usize,

    /// Hard bound on buffered samples; exceeding it aborts the trail
    #[arg(long, default_value_t = 5000)]
    pub buffer_capacity: usize,

    /// Commit attempts before a trail is aborted
    #[arg(long, default_value_t = 5)]
    pub retry_budget: u32,

    /// Seconds before a store call times out
    #[arg(long, default_value_t = 10)]
    pub store_timeout: u64,

    /// Replay a recorded JSON-lines position capture instead of waiting
    /// for live ingestion
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Operation id used for trails auto-opened during replay
    #[arg(long, default_value = "replay")]
    pub replay_operation: String,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Args::parse_from(["swathe-server"])
    }
}

/// Shared session data, passed explicitly to every component.
#[derive(Debug)]
pub struct SessionData {
    pub args: Args,
}

/// Handle passed around the server, mirroring one process-wide
/// configuration without global state.
pub type Session = Arc<RwLock<SessionData>>;

pub fn new_session(args: Args) -> Session {
    Arc::new(RwLock::new(SessionData { args }))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Errors surfaced by server components.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("shutdown")]
    Shutdown,

    /// A non-terminal trail already exists for this vehicle + operation
    #[error("trail already open for {vehicle} in operation {operation}")]
    Conflict {
        vehicle: VehicleId,
        operation: OperationId,
    },

    #[error("no open trail for vehicle {0}")]
    NoActiveTrail(VehicleId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Timing knobs for trail sessions, derived from `Args` in one place.
pub fn session_config(session: &Session) -> SessionConfig {
    let args = &session.read().unwrap().args;
    SessionConfig {
        commit_interval: Duration::from_secs(args.commit_interval),
        commit_batch: args.commit_batch,
        buffer_capacity: args.buffer_capacity,
        retry_budget: args.retry_budget,
        store_timeout: Duration::from_secs(args.store_timeout),
        ..SessionConfig::default()
    }
}
