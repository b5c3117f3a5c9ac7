//! Shared proptest generators.

use proptest::prelude::*;
use std::time::Duration;

use crate::fixtures::status_json;

/// Generate API client ids in the `user.<uuid-ish>` shape.
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    "user\\.[a-z0-9]{8}-[a-z0-9]{4}".prop_map(String::from)
}

/// Generate client secrets distinct from any field name.
pub fn client_secret_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{24,40}".prop_map(|s| format!("sk-{s}"))
}

/// Generate master passwords, including punctuation and spaces.
pub fn password_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9!@#$%^&* ]{1,64}"
}

/// Generate https server URLs.
pub fn server_url_strategy() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9-]{2,15}", prop_oneof![Just("com"), Just("io"), Just("net")])
        .prop_map(|(host, tld)| format!("https://{host}.example.{tld}"))
}

/// Generate session tokens. Some embed words that look like error markers.
pub fn session_token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9+/]{40,88}={0,2}",
        (
            "[A-Za-z0-9]{8,20}",
            prop_oneof![Just("error"), Just("Invalid"), Just("failed"), Just("unauthorized")],
            "[A-Za-z0-9]{8,20}",
        )
            .prop_map(|(a, marker, b)| format!("{a}{marker}{b}")),
    ]
}

/// Generate `status` lock values as the client spells them.
pub fn raw_lock_status_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("unauthenticated"), Just("locked"), Just("unlocked")]
}

/// Generate complete `status` documents with their lock value.
pub fn status_json_strategy() -> impl Strategy<Value = (&'static str, String)> {
    (raw_lock_status_strategy(), proptest::option::of(server_url_strategy()))
        .prop_map(|(status, url)| (status, status_json(status, url.as_deref())))
}

/// Generate session TTLs (1 minute to 24 hours).
pub fn ttl_strategy() -> impl Strategy<Value = Duration> {
    (60u64..86_400).prop_map(Duration::from_secs)
}

/// Generate small retry counts.
pub fn retry_count_strategy() -> impl Strategy<Value = u32> {
    0u32..6
}
