pub mod connection_manager;
pub mod events;
pub mod handler;

pub use connection_manager::ConnectionManager;
pub use handler::websocket_handler;

/// Runs the periodic stale-channel/stale-machine sweep (§4.D, §5): every
/// `heartbeat_interval`, close channels silent for longer than
/// `heartbeat_timeout` and transition their machines offline, broadcasting
/// presence to the rest of the owner's live machine-channels.
pub async fn run_heartbeat_sweep(state: crate::state::AppState) {
    let mut ticker = tokio::time::interval(state.config.heartbeat_interval);
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

async fn sweep_once(state: &crate::state::AppState) {
    let stale = state.connections.stale_channels(state.config.heartbeat_timeout).await;
    for channel in stale {
        let snap = channel.snapshot().await;
        state.connections.remove(channel.id).await;
        if let Some(machine_id) = snap.machine_id {
            state.signaling.registry().remove_machine_channel(machine_id).await;
            if let Err(e) = state.machines.set_online(machine_id, false).await {
                tracing::warn!(error = ?e, %machine_id, "failed to mark machine offline during sweep");
            }
            crate::presence::broadcast(
                state.signaling.registry(),
                &state.machines,
                machine_id,
                false,
                Some(&channel),
            )
            .await;
        }
        if let Some(web_client_id) = snap.web_client_id {
            state.signaling.registry().remove_web_channel(&web_client_id).await;
        }
        channel.close();
    }

    match state.machines.sweep_stale(state.config.heartbeat_timeout).await {
        Ok(ids) => {
            for machine_id in ids {
                crate::presence::broadcast(
                    state.signaling.registry(),
                    &state.machines,
                    machine_id,
                    false,
                    None,
                )
                .await;
            }
        }
        Err(e) => tracing::warn!(error = ?e, "sweep_stale failed"),
    }
}
