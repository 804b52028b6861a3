//! Sandbox path extraction from status-update payloads.
//!
//! Docker tasks report their mounts as a JSON array of blocks; the
//! sandbox path is the host source of the mount whose destination is
//! the agent sandbox. Absence of the payload or the mount is not an
//! error.

use serde::Deserialize;
use tracing::debug;

const SANDBOX_DESTINATION: &str = "/mnt/mesos/sandbox";

#[derive(Debug, Deserialize)]
struct MountBlock {
    #[serde(rename = "Mounts", default)]
    mounts: Vec<Mount>,
}

#[derive(Debug, Deserialize)]
struct Mount {
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Destination", default)]
    destination: String,
}

/// Pull the sandbox host path out of an update payload, if present.
pub fn sandbox_path(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    let blocks: Vec<MountBlock> = match serde_json::from_slice(data) {
        Ok(blocks) => blocks,
        Err(e) => {
            debug!(error = %e, "status payload is not a mount list");
            return None;
        }
    };
    blocks
        .into_iter()
        .flat_map(|b| b.mounts)
        .find(|m| m.destination == SANDBOX_DESTINATION)
        .map(|m| m.source)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_sandbox_mount() {
        let payload = br#"[{"Mounts":[{"Source":"/tmp/x","Destination":"/mnt/mesos/sandbox","Mode":"","RW":true}]}]"#;
        assert_eq!(sandbox_path(payload).as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn ignores_other_mounts() {
        let payload = br#"[{"Mounts":[{"Source":"/var/lib","Destination":"/data","Mode":"","RW":true}]}]"#;
        assert_eq!(sandbox_path(payload), None);
    }

    #[test]
    fn first_matching_mount_wins() {
        let payload = br#"[
            {"Mounts":[{"Source":"/a","Destination":"/mnt/mesos/sandbox"}]},
            {"Mounts":[{"Source":"/b","Destination":"/mnt/mesos/sandbox"}]}
        ]"#;
        assert_eq!(sandbox_path(payload).as_deref(), Some("/a"));
    }

    #[test]
    fn empty_or_malformed_payloads_yield_none() {
        assert_eq!(sandbox_path(b""), None);
        assert_eq!(sandbox_path(b"not json"), None);
        assert_eq!(sandbox_path(b"{}"), None);
    }
}
