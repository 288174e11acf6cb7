// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

// ── Plugin API keys ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    /// The plugin has no key configured; any caller may act for it.
    Open,
    Accepted,
    Missing,
    Mismatch,
}

impl KeyCheck {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Open | Self::Accepted)
    }
}

/// Check the `X-API-Key` a caller presented against the plugin's key.
pub fn check_plugin_key(expected: Option<&str>, provided: Option<&str>) -> KeyCheck {
    let Some(expected) = expected else {
        return KeyCheck::Open;
    };
    match provided {
        None => KeyCheck::Missing,
        Some(given) if safe_equal(given, expected) => KeyCheck::Accepted,
        Some(_) => KeyCheck::Mismatch,
    }
}
