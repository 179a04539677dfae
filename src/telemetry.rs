// src/telemetry.rs
//! Dev-only tracing and anonymised request fingerprints.
//!
//! Request text is clinical free text: it never goes to the log. Dev logs
//! carry a short SHA-256 prefix and lengths instead.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_DEV_LOG: &str = "SHORTLIST_DEV_LOG";

fn is_dev_env() -> bool {
    cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        )
}

// Dev logging gate: SHORTLIST_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub fn dev_logging_enabled() -> bool {
    std::env::var(ENV_DEV_LOG).ok().as_deref() == Some("1") && is_dev_env()
}

/// First 6 bytes of SHA-256 as hex.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Install a compact fmt subscriber when dev logging is enabled. No-op
/// otherwise, and safe to call more than once.
pub fn init_dev_tracing() {
    if !dev_logging_enabled() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shortlist=debug,corpus=info,config=warn,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn anon_hash_is_short_and_stable() {
        let a = anon_hash("Rezidiviertes NSCLC");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, anon_hash("Rezidiviertes NSCLC"));
        assert_ne!(a, anon_hash("Rezidiviertes SCLC"));
    }

    #[test]
    #[serial]
    fn dev_log_requires_flag() {
        std::env::remove_var(ENV_DEV_LOG);
        assert!(!dev_logging_enabled());
        std::env::set_var(ENV_DEV_LOG, "1");
        assert_eq!(dev_logging_enabled(), is_dev_env());
        std::env::remove_var(ENV_DEV_LOG);
    }
}
