use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::connection_manager::ControlChannel;
use super::events::{
    error_frame, InboundFrame, OutboundFrame, WireErrorCode, MSG_AUTH, MSG_AUTH_RESPONSE,
    MSG_CONNECTION_ACCEPTED, MSG_CONNECTION_REJECTED, MSG_CONNECT_TO_MACHINE, MSG_DELETE_MACHINE,
    MSG_DELETE_MACHINE_RESPONSE, MSG_HEARTBEAT, MSG_HEARTBEAT_ACK, MSG_LIST_MACHINES,
    MSG_MACHINES_LIST, MSG_MACHINE_REGISTERED, MSG_REGISTER_MACHINE, MSG_REGISTER_USER,
    MSG_REGISTER_USER_RESPONSE, MSG_RENAME_MACHINE, MSG_RENAME_MACHINE_RESPONSE, MSG_RTC_ANSWER,
    MSG_RTC_ICE_CANDIDATE, MSG_RTC_OFFER,
};
use crate::models::{Capabilities, Platform};
use crate::{auth, presence, state::AppState};

// ============================================================================
// Upgrade handler
// ============================================================================

/// `GET /ws` — upgrade to a control channel. Authentication happens inside
/// the channel via the `auth` message, not at upgrade time: an unauthenticated
/// browser must still be able to connect and call `register_user`/`auth`.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ============================================================================
// Connection lifecycle
// ============================================================================

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let channel = ControlChannel::new(tx);
    state.connections.insert(channel.clone()).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let recv_channel = channel.clone();
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&recv_channel, &recv_state, &text).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = ?e, "WebSocket receive error; closing connection");
                    break;
                }
                None => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = channel.closed() => {
            send_task.abort();
            recv_task.abort();
        }
    }

    on_channel_close(&channel, &state).await;
}

async fn on_channel_close(channel: &Arc<ControlChannel>, state: &AppState) {
    state.connections.remove(channel.id).await;

    let snap = channel.snapshot().await;
    if let Some(machine_id) = snap.machine_id {
        state.signaling.registry().remove_machine_channel(machine_id).await;
        if let Err(e) = state.machines.set_online(machine_id, false).await {
            tracing::warn!(error = ?e, %machine_id, "failed to mark machine offline on disconnect");
        }
        presence::broadcast(
            state.signaling.registry(),
            &state.machines,
            machine_id,
            false,
            Some(channel),
        )
        .await;
    }
    if let Some(web_client_id) = snap.web_client_id {
        state.signaling.registry().remove_web_channel(&web_client_id).await;
    }
}

// ============================================================================
// Dispatch
// ============================================================================

async fn handle_client_message(channel: &Arc<ControlChannel>, state: &AppState, raw: &str) {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(_) => {
            // Best-effort: recover `id` for correlation even though the frame
            // as a whole didn't parse as `InboundFrame` (missing/non-string
            // `type`, wrong shape, etc).
            let id = serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
            channel.send(error_frame(id, WireErrorCode::InvalidMessage, None).to_json());
            return;
        }
    };

    let id = frame.id;
    let payload = frame.payload;

    match frame.kind.as_str() {
        MSG_AUTH => handle_auth(channel, state, id, payload).await,
        MSG_REGISTER_USER => handle_register_user(channel, state, id, payload).await,
        MSG_REGISTER_MACHINE => handle_register_machine(channel, state, id, payload).await,
        MSG_HEARTBEAT => handle_heartbeat(channel, state, id).await,
        MSG_LIST_MACHINES => handle_list_machines(channel, state, id).await,
        MSG_DELETE_MACHINE => handle_delete_machine(channel, state, id, payload).await,
        MSG_RENAME_MACHINE => handle_rename_machine(channel, state, id, payload).await,
        MSG_CONNECT_TO_MACHINE => handle_connect_to_machine(channel, state, id, payload).await,
        MSG_CONNECTION_ACCEPTED => handle_connection_accepted(channel, state, id, payload).await,
        MSG_CONNECTION_REJECTED => handle_connection_rejected(channel, state, payload).await,
        MSG_RTC_OFFER => handle_rtc_offer(channel, state, id, payload).await,
        MSG_RTC_ANSWER => handle_rtc_answer(channel, state, id, payload).await,
        MSG_RTC_ICE_CANDIDATE => handle_rtc_ice_candidate(channel, state, payload).await,
        _ => channel.send(error_frame(id, WireErrorCode::UnknownMessage, None).to_json()),
    }
}

fn invalid_message(channel: &Arc<ControlChannel>, id: Option<String>) {
    channel.send(error_frame(id, WireErrorCode::InvalidMessage, None).to_json());
}

fn not_authenticated(channel: &Arc<ControlChannel>, id: Option<String>) {
    channel.send(error_frame(id, WireErrorCode::NotAuthenticated, None).to_json());
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn uuid_field(payload: &Value, key: &str) -> Option<Uuid> {
    str_field(payload, key).and_then(|s| Uuid::parse_str(&s).ok())
}

// ---------------------------------------------------------------------------
// auth
// ---------------------------------------------------------------------------

async fn handle_auth(channel: &Arc<ControlChannel>, state: &AppState, id: Option<String>, payload: Value) {
    let result = if let Some(token) = str_field(&payload, "token") {
        auth::verify_bearer(&token, &state.config.jwt_secret)
            .and_then(|(user_id, _email)| Ok((user_id, token)))
    } else if let (Some(email), Some(password)) =
        (str_field(&payload, "email"), str_field(&payload, "password"))
    {
        match auth::login_user(
            &state.pool,
            &email,
            &password,
            &state.config.jwt_secret,
            state.config.jwt_expires_in,
        )
        .await
        {
            Ok((user, token)) => Ok((user.id, token)),
            Err(e) => Err(e),
        }
    } else {
        invalid_message(channel, id);
        return;
    };

    match result {
        Ok((user_id, token)) => {
            channel.authenticate(user_id).await;
            let user = match crate::db::queries::find_user_by_id(&state.pool, user_id).await {
                Ok(Some(user)) => user,
                _ => {
                    channel.send(
                        OutboundFrame::new(MSG_AUTH_RESPONSE, json!({ "success": false }))
                            .with_id(id)
                            .to_json(),
                    );
                    return;
                }
            };
            let user: crate::models::UserDto = user.into();
            channel.send(
                OutboundFrame::new(
                    MSG_AUTH_RESPONSE,
                    json!({ "success": true, "user": user, "token": token }),
                )
                .with_id(id)
                .to_json(),
            );
        }
        Err(e) => {
            channel.send(
                OutboundFrame::new(
                    MSG_AUTH_RESPONSE,
                    json!({ "success": false, "error": e.to_string() }),
                )
                .with_id(id)
                .to_json(),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// register_user
// ---------------------------------------------------------------------------

async fn handle_register_user(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let (Some(email), Some(username), Some(password)) = (
        str_field(&payload, "email"),
        str_field(&payload, "username"),
        str_field(&payload, "password"),
    ) else {
        invalid_message(channel, id);
        return;
    };

    match auth::register_user(
        &state.pool,
        &email,
        &username,
        &password,
        &state.config.jwt_secret,
        state.config.jwt_expires_in,
    )
    .await
    {
        Ok((user, token)) => {
            channel.authenticate(user.id).await;
            channel.send(
                OutboundFrame::new(
                    MSG_REGISTER_USER_RESPONSE,
                    json!({ "success": true, "user": user, "token": token }),
                )
                .with_id(id)
                .to_json(),
            );
        }
        Err(e) => {
            channel.send(
                OutboundFrame::new(
                    MSG_REGISTER_USER_RESPONSE,
                    json!({ "success": false, "error": e.to_string() }),
                )
                .with_id(id)
                .to_json(),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// register_machine
// ---------------------------------------------------------------------------

async fn handle_register_machine(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let snap = channel.snapshot().await;
    let Some(user_id) = snap.user_id else {
        not_authenticated(channel, id);
        return;
    };

    let Some(name) = str_field(&payload, "name") else {
        invalid_message(channel, id);
        return;
    };
    let Some(platform) = payload
        .get("platform")
        .and_then(|v| serde_json::from_value::<Platform>(v.clone()).ok())
    else {
        invalid_message(channel, id);
        return;
    };
    let capabilities: Capabilities = payload
        .get("capabilities")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    match state.machines.register(user_id, &name, platform, capabilities).await {
        Ok(machine) => {
            channel.set_machine_id(machine.id).await;
            state
                .signaling
                .registry()
                .register_machine_channel(machine.id, channel.clone())
                .await;
            presence::broadcast(
                state.signaling.registry(),
                &state.machines,
                machine.id,
                true,
                Some(channel),
            )
            .await;
            channel.send(
                OutboundFrame::new(
                    MSG_MACHINE_REGISTERED,
                    json!({ "machineId": machine.id, "name": machine.name }),
                )
                .with_id(id)
                .to_json(),
            );
        }
        Err(e) => {
            tracing::warn!(error = ?e, "register_machine failed");
            channel.send(error_frame(id, WireErrorCode::RegistrationFailed, None).to_json());
        }
    }
}

// ---------------------------------------------------------------------------
// heartbeat
// ---------------------------------------------------------------------------

async fn handle_heartbeat(channel: &Arc<ControlChannel>, state: &AppState, id: Option<String>) {
    channel.touch_heartbeat().await;
    let snap = channel.snapshot().await;
    if let Some(machine_id) = snap.machine_id {
        if let Err(e) = state.machines.heartbeat(machine_id).await {
            tracing::warn!(error = ?e, %machine_id, "heartbeat persist failed");
        }
    }
    channel.send(OutboundFrame::new(MSG_HEARTBEAT_ACK, json!({})).with_id(id).to_json());
}

// ---------------------------------------------------------------------------
// list_machines
// ---------------------------------------------------------------------------

async fn handle_list_machines(channel: &Arc<ControlChannel>, state: &AppState, id: Option<String>) {
    let snap = channel.snapshot().await;
    let Some(user_id) = snap.user_id else {
        not_authenticated(channel, id);
        return;
    };

    match state.machines.list_owned(user_id).await {
        Ok(machines) => {
            channel.send(
                OutboundFrame::new(MSG_MACHINES_LIST, json!({ "machines": machines }))
                    .with_id(id)
                    .to_json(),
            );
        }
        Err(e) => {
            tracing::error!(error = ?e, "list_machines failed");
            channel.send(
                OutboundFrame::new(MSG_MACHINES_LIST, json!({ "success": false }))
                    .with_id(id)
                    .to_json(),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// delete_machine / rename_machine
// ---------------------------------------------------------------------------

async fn handle_delete_machine(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let snap = channel.snapshot().await;
    let Some(user_id) = snap.user_id else {
        not_authenticated(channel, id);
        return;
    };
    let Some(machine_id) = uuid_field(&payload, "machineId") else {
        invalid_message(channel, id);
        return;
    };

    let success = state.machines.delete(user_id, machine_id).await.unwrap_or(false);
    channel.send(
        OutboundFrame::new(
            MSG_DELETE_MACHINE_RESPONSE,
            json!({ "success": success, "machineId": machine_id }),
        )
        .with_id(id)
        .to_json(),
    );
}

async fn handle_rename_machine(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let snap = channel.snapshot().await;
    let Some(user_id) = snap.user_id else {
        not_authenticated(channel, id);
        return;
    };
    let (Some(machine_id), Some(new_name)) =
        (uuid_field(&payload, "machineId"), str_field(&payload, "newName"))
    else {
        invalid_message(channel, id);
        return;
    };

    let success = state
        .machines
        .rename(user_id, machine_id, &new_name)
        .await
        .unwrap_or(false);
    channel.send(
        OutboundFrame::new(
            MSG_RENAME_MACHINE_RESPONSE,
            json!({ "success": success, "machineId": machine_id, "name": new_name }),
        )
        .with_id(id)
        .to_json(),
    );
}

// ---------------------------------------------------------------------------
// Signaling dispatch (4.E)
// ---------------------------------------------------------------------------

async fn handle_connect_to_machine(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let Some(target_machine_id) = uuid_field(&payload, "targetMachineId") else {
        invalid_message(channel, id);
        return;
    };

    state
        .signaling
        .connect_to_machine(
            &state.machines,
            channel,
            id,
            target_machine_id,
            state.config.pending_timeout,
        )
        .await;
}

async fn handle_connection_accepted(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let Some(connection_id) = uuid_field(&payload, "connectionId") else {
        invalid_message(channel, id);
        return;
    };
    state.signaling.connection_accepted(channel, id, connection_id).await;
}

async fn handle_connection_rejected(channel: &Arc<ControlChannel>, state: &AppState, payload: Value) {
    let Some(connection_id) = uuid_field(&payload, "connectionId") else {
        return;
    };
    let reason = str_field(&payload, "reason");
    state.signaling.connection_rejected(channel, connection_id, reason).await;
}

async fn handle_rtc_offer(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let (Some(connection_id), Some(target_machine_id)) = (
        uuid_field(&payload, "connectionId"),
        uuid_field(&payload, "targetMachineId"),
    ) else {
        invalid_message(channel, id);
        return;
    };
    let sdp = payload.get("sdp").cloned().unwrap_or(Value::Null);
    state
        .signaling
        .rtc_offer(channel, id, connection_id, target_machine_id, sdp)
        .await;
}

async fn handle_rtc_answer(
    channel: &Arc<ControlChannel>,
    state: &AppState,
    id: Option<String>,
    payload: Value,
) {
    let (Some(connection_id), Some(target_machine_id)) = (
        uuid_field(&payload, "connectionId"),
        str_field(&payload, "targetMachineId"),
    ) else {
        invalid_message(channel, id);
        return;
    };
    let sdp = payload.get("sdp").cloned().unwrap_or(Value::Null);
    state
        .signaling
        .rtc_answer(channel, id, connection_id, target_machine_id, sdp)
        .await;
}

async fn handle_rtc_ice_candidate(channel: &Arc<ControlChannel>, state: &AppState, payload: Value) {
    let (Some(connection_id), Some(target_machine_id)) = (
        uuid_field(&payload, "connectionId"),
        str_field(&payload, "targetMachineId"),
    ) else {
        return;
    };
    let candidate = payload.get("candidate").cloned().unwrap_or(Value::Null);
    state
        .signaling
        .rtc_ice_candidate(channel, connection_id, target_machine_id, candidate)
        .await;
}
