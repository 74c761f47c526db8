use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use swathe_core::types::OperationId;
use swathe_server::feed::ReplayFeed;
use swathe_server::web::{self, AppState};
use swathe_server::{
    new_session, session_config, Args, Fleet, MemoryTrailStore, TrailStore, TrailSyncer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    log::info!("swathe-server {}", env!("CARGO_PKG_VERSION"));

    let session = new_session(args.clone());
    let config = session_config(&session);

    // The in-process store doubles as the notification hub; a deployment
    // against the hosted trail store swaps this for the network client.
    let store = Arc::new(MemoryTrailStore::new());
    let syncer = TrailSyncer::new(store.changes());
    let fleet = Fleet::new(config, store.clone(), syncer.view());

    let state = AppState {
        fleet: fleet.clone(),
        store,
    };
    let listen = args.listen.clone();
    let replay = args.replay.clone();
    let replay_operation = OperationId(args.replay_operation.clone());
    let replay_fleet = fleet.clone();

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("sync", move |h| syncer.run(h)));
        s.start(SubsystemBuilder::new("fleet", move |h| fleet.run(h)));
        s.start(SubsystemBuilder::new("web", move |h| web::run(state, listen, h)));
        if let Some(path) = replay {
            let feed = ReplayFeed::new(replay_fleet, path, replay_operation);
            s.start(SubsystemBuilder::new("replay", move |h| feed.run(h)));
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(10))
    .await
    .map_err(anyhow::Error::from)
}
