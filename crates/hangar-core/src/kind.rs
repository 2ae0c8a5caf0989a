//! Capability kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The three kinds of capability package a host can install.
///
/// Each kind has its own registry, state file and install root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    /// Conversational personality.
    Agent,
    /// MCP-style tool server.
    ToolServer,
    /// Bundled sub-application.
    Application,
}

impl CapabilityKind {
    /// Every kind, in display order.
    pub const ALL: [Self; 3] = [Self::Agent, Self::ToolServer, Self::Application];

    /// Stable name used for directories and file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::ToolServer => "tool-server",
            Self::Application => "application",
        }
    }

    /// Top-level key holding the capability map in this kind's registry document.
    #[must_use]
    pub fn registry_key(self) -> &'static str {
        match self {
            Self::Agent => "agents",
            Self::ToolServer => "servers",
            Self::Application => "apps",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" | "agents" => Ok(Self::Agent),
            "tool-server" | "tool-servers" | "server" | "servers" | "mcp" => Ok(Self::ToolServer),
            "application" | "applications" | "app" | "apps" => Ok(Self::Application),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("mcp".parse::<CapabilityKind>().unwrap(), CapabilityKind::ToolServer);
        assert_eq!("apps".parse::<CapabilityKind>().unwrap(), CapabilityKind::Application);
        assert!(matches!(
            "plugin".parse::<CapabilityKind>(),
            Err(CoreError::UnknownKind(_))
        ));
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&CapabilityKind::ToolServer).unwrap();
        assert_eq!(json, "\"tool-server\"");
    }
}
