use serde::{Deserialize};

/// The role a node is configured with at process start.
/// Roles change at runtime through failover, but every restart begins from these.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum InitialRole {
    // Invalid, used to indicate value was not explicitly set
    Invalid,
    // Master accepts writes
    Master,
    // Replica2006 mirrors the 2006 birth year partition
    #[serde(rename = "replica-2006")]
    Replica2006,
    // Replica2007 mirrors the 2007 birth year partition
    #[serde(rename = "replica-2007")]
    Replica2007,
}

impl Default for InitialRole {
    fn default() -> Self {
        InitialRole::Invalid
    }
}
