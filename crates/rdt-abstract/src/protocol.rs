use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which reliable-transfer state-machine pair drives a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Gbn,
    Sr,
    TcpLike,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 3] = [ProtocolKind::Gbn, ProtocolKind::Sr, ProtocolKind::TcpLike];
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolKind::Gbn => "GBN",
            ProtocolKind::Sr => "SR",
            ProtocolKind::TcpLike => "TCP-like",
        };
        f.write_str(name)
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gbn" => Ok(ProtocolKind::Gbn),
            "sr" => Ok(ProtocolKind::Sr),
            "tcp" | "tcp_like" | "tcp-like" => Ok(ProtocolKind::TcpLike),
            other => Err(format!("unknown protocol '{other}' (expected gbn, sr or tcp)")),
        }
    }
}
