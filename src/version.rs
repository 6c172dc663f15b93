//! Build/version metadata, resolved entirely at compile time. Sentinel has
//! no bespoke version library to port — `CARGO_PKG_VERSION` plus two
//! build-injected `option_env!` values cover the same surface.

#[derive(Debug, Clone)]
pub struct Metadata {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub commit_hash: &'static str,
}

const UNKNOWN: &str = "unknown";

/// Returns the crate's version plus whatever build-time metadata was
/// injected via `SENTINEL_BUILD_TIMESTAMP`/`SENTINEL_COMMIT_HASH` (set by
/// the release build, absent in local `cargo build`).
pub fn metadata() -> Metadata {
    Metadata {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: option_env!("SENTINEL_BUILD_TIMESTAMP").unwrap_or(UNKNOWN),
        commit_hash: option_env!("SENTINEL_COMMIT_HASH").unwrap_or(UNKNOWN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_always_has_a_semver_version() {
        let m = metadata();
        assert!(!m.version.is_empty());
    }

    #[test]
    fn unset_build_metadata_falls_back_to_unknown() {
        let m = metadata();
        assert_eq!(m.build_timestamp, UNKNOWN);
        assert_eq!(m.commit_hash, UNKNOWN);
    }
}
