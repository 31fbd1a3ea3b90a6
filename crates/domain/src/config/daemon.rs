use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Daemon address
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the daemon listens. The host is resolved on every dial so a
/// name like `localhost` can yield both IPv4 and IPv6 addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_7185")]
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_7185(),
        }
    }
}

fn d_host() -> String {
    "localhost".into()
}
fn d_7185() -> u16 {
    7185
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_table() {
        let cfg: DaemonConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "localhost");
    }
}
