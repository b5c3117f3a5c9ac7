//! Canned vault client output.

use chrono::{DateTime, Utc};
use serde_json::json;

/// Server URL used by fixtures.
pub const SERVER_URL: &str = "https://vault.example.com";

/// Client id used by fixtures.
pub const CLIENT_ID: &str = "user.1";

/// Client secret used by fixtures.
pub const CLIENT_SECRET: &str = "s3cr3t";

/// Session token issued by fixtures.
pub const SESSION_TOKEN: &str = "5PBYGU+5yt3RHcCjoeJKx/wByU34vokGRZjXpSH7Ylo8w==";

/// stderr of a rejected master password.
pub const INVALID_PASSWORD: &str = "Invalid master password.";

/// stderr of a command that needs a login.
pub const NOT_LOGGED_IN: &str = "You are not logged in.";

/// stderr of `config server` while logged in.
pub const LOGOUT_REQUIRED: &str = "Logout required before server config update.";

/// stdout of a successful API-key login.
pub const LOGIN_OK: &str = "You are logged in!\n\nTo unlock your vault, use the `unlock` command. ex:\n$ bw unlock";

/// stdout of a successful sync.
pub const SYNC_OK: &str = "Syncing complete.";

/// Fixed sync timestamp.
#[must_use]
pub fn last_sync() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T10:00:00.000Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// `status` output with the given lock value and server.
#[must_use]
pub fn status_json(status: &str, server_url: Option<&str>) -> String {
    let authenticated = status != "unauthenticated";
    json!({
        "serverUrl": server_url,
        "lastSync": authenticated.then(|| last_sync().to_rfc3339()),
        "userEmail": authenticated.then_some("svc@example.com"),
        "userId": authenticated.then_some("6c8b9a3e-1b0e-4c55-9d7a-2f6e1c0b7d11"),
        "status": status,
    })
    .to_string()
}

/// `status` output for a fresh client.
#[must_use]
pub fn unauthenticated() -> String {
    status_json("unauthenticated", None)
}

/// `status` output for a logged-in, locked client.
#[must_use]
pub fn locked() -> String {
    status_json("locked", Some(SERVER_URL))
}

/// `status` output for an unlocked client.
#[must_use]
pub fn unlocked() -> String {
    status_json("unlocked", Some(SERVER_URL))
}
