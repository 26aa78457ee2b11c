use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a pipe in a [`NetworkArena`](crate::network::NetworkArena).
    pub struct PipeId;

    /// Identifies a connector in a [`NetworkArena`](crate::network::NetworkArena).
    pub struct ConnectorId;
}

/// Identifies a registered pipe kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PipeKindId(pub u32);

/// Identifies a registered set of connector properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectorPropertiesId(pub u32);

/// One port of one pipe: what a connector side attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub pipe: PipeId,
    pub port: usize,
}

impl PortRef {
    pub fn new(pipe: PipeId, port: usize) -> Self {
        Self { pipe, port }
    }
}
