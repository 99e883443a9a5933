use std::env;
use std::time::Duration;

/// Process-wide configuration, loaded once from the environment at startup.
///
/// Covers every env var the wire protocol names: `PORT`, `HOST`,
/// `DATABASE_URL`, `JWT_SECRET`, `JWT_EXPIRES_IN`, `ALLOWED_ORIGINS`,
/// `STUN_SERVERS`, `TURN_URL`/`TURN_TCP_URL`/`TURNS_URL`, `TURN_USERNAME`,
/// `TURN_CREDENTIAL`, plus the ambient heartbeat/pending-timeout knobs.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub allowed_origins: Vec<String>,
    pub stun_servers: Vec<String>,
    pub turn_url: Option<String>,
    pub turn_tcp_url: Option<String>,
    pub turns_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
    /// How often the stale-channel sweep runs.
    pub heartbeat_interval: Duration,
    /// How long a channel may go without a heartbeat before it is closed.
    pub heartbeat_timeout: Duration,
    /// How long a pending connection may wait for acceptance before it times out.
    pub pending_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            database_url: env::var("DATABASE_URL")?,
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev_secret_change_in_production".to_string()),
            jwt_expires_in: parse_duration(&env::var("JWT_EXPIRES_IN").unwrap_or_default())
                .unwrap_or_else(|| Duration::from_secs(7 * 24 * 3600)),
            allowed_origins: split_csv(env::var("ALLOWED_ORIGINS").ok()),
            stun_servers: split_csv(env::var("STUN_SERVERS").ok()),
            turn_url: env::var("TURN_URL").ok(),
            turn_tcp_url: env::var("TURN_TCP_URL").ok(),
            turns_url: env::var("TURNS_URL").ok(),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
            heartbeat_interval: env::var("HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(30)),
            heartbeat_timeout: env::var("HEARTBEAT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(90)),
            pending_timeout: env::var("PENDING_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(30)),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_dev(&self) -> bool {
        env::var("APP_ENV").as_deref() != Ok("production")
    }
}

fn split_csv(val: Option<String>) -> Vec<String> {
    val.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses suffixed durations like "7d", "24h", "3600s".
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "d" => Some(Duration::from_secs(n * 24 * 3600)),
        "h" => Some(Duration::from_secs(n * 3600)),
        "s" => Some(Duration::from_secs(n)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_suffix() {
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(7 * 24 * 3600)));
    }

    #[test]
    fn parses_hour_suffix() {
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(24 * 3600)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration("nonsense"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn split_csv_trims_and_drops_empty() {
        let out = split_csv(Some(" a , b,,c ".to_string()));
        assert_eq!(out, vec!["a", "b", "c"]);
    }
}
