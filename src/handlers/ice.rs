use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{json, Value};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::state::AppState;

type HmacSha1 = Hmac<Sha1>;

#[derive(Serialize)]
struct IceServer {
    urls: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<String>,
}

/// `GET /ice-servers` → `{iceServers:[{urls}|{urls,username,credential}...]}`.
///
/// TURN entries are generated with ephemeral, time-limited credentials
/// (RFC 5766 §"TURN REST API" convention: `username = "<expiry>:<label>"`,
/// `credential = base64(HMAC-SHA1(sharedSecret, username))`) and are omitted
/// entirely when no shared credential is configured.
pub async fn ice_servers(State(state): State<AppState>) -> Json<Value> {
    let mut servers: Vec<IceServer> = state
        .config
        .stun_servers
        .iter()
        .map(|url| IceServer {
            urls: url.clone(),
            username: None,
            credential: None,
        })
        .collect();

    if let Some(shared_secret) = state.config.turn_credential.as_deref().filter(|s| !s.is_empty()) {
        let label = state.config.turn_username.as_deref().unwrap_or("rendezvous");
        let (username, credential) = ephemeral_turn_credential(shared_secret, label, 3600);

        for url in [&state.config.turn_url, &state.config.turn_tcp_url, &state.config.turns_url]
            .into_iter()
            .flatten()
        {
            servers.push(IceServer {
                urls: url.clone(),
                username: Some(username.clone()),
                credential: Some(credential.clone()),
            });
        }
    }

    Json(json!({ "iceServers": servers }))
}

fn ephemeral_turn_credential(shared_secret: &str, label: &str, ttl_secs: u64) -> (String, String) {
    let expiry = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl_secs;
    let username = format!("{expiry}:{label}");

    let mut mac = HmacSha1::new_from_slice(shared_secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(username.as_bytes());
    let credential = STANDARD.encode(mac.finalize().into_bytes());

    (username, credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_credential_username_embeds_label() {
        let (username, credential) = ephemeral_turn_credential("secret", "rendezvous", 3600);
        assert!(username.ends_with(":rendezvous"));
        assert!(!credential.is_empty());
    }

    #[test]
    fn ephemeral_credential_is_deterministic_for_same_username() {
        let (username, c1) = ephemeral_turn_credential("secret", "rendezvous", 3600);
        let mut mac = HmacSha1::new_from_slice(b"secret").unwrap();
        mac.update(username.as_bytes());
        let c2 = STANDARD.encode(mac.finalize().into_bytes());
        assert_eq!(c1, c2);
    }
}
