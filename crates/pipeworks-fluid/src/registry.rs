//! Pipe kinds and connector properties, registered once at startup.
//!
//! Kinds are looked up by name when a scene is loaded and by
//! [`PipeKindId`] everywhere else. Nothing is constructed by reflection:
//! [`PipeNetwork::build_pipe`](crate::network::PipeNetwork::build_pipe) reads
//! a [`PipeKind`] and builds from it.

use std::collections::HashMap;

use glam::Vec3;
use pipeworks_core::fixed::Volume;
use pipeworks_physics::Shape;
use serde::{Deserialize, Serialize};

use crate::id::{ConnectorPropertiesId, PipeKindId};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorShape {
    Round,
    Square,
}

/// Geometry shared by every connector of a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorProperties {
    pub shape: ConnectorShape,
    pub connector_diameter: f32,
    pub flow_area_diameter: f32,
}

impl ConnectorProperties {
    /// The collider used for both the junction and its preview.
    pub fn collider_shape(&self) -> Shape {
        let r = self.connector_diameter * 0.5;
        match self.shape {
            ConnectorShape::Round => Shape::ball(r),
            ConnectorShape::Square => Shape::cuboid(Vec3::splat(r)),
        }
    }
}

/// Where a pipe can be joined, and which of its containers that joint
/// drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
    /// Offset from the pipe origin, in pipe space.
    pub offset: [f32; 3],
    pub container: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeKind {
    pub ports: Vec<PortDef>,
    /// Capacity of each container, in cubic metres.
    pub container_volumes: Vec<f64>,
    pub half_extents: [f32; 3],
    pub mass: f32,
    pub connector: ConnectorPropertiesId,
}

impl PipeKind {
    pub fn collider_shape(&self) -> Shape {
        Shape::cuboid(Vec3::from_array(self.half_extents))
    }

    /// Container capacities. A capacity that is not a finite, non-negative
    /// number reads as empty; [`PipeKindRegistryBuilder::build`] rejects
    /// such kinds.
    pub fn volumes(&self) -> impl Iterator<Item = Volume> + '_ {
        self.container_volumes
            .iter()
            .map(|v| Volume::checked_from_f64(*v).unwrap_or(Volume::ZERO))
    }

    pub fn port_container(&self, port: usize) -> Option<usize> {
        self.ports.get(port).map(|p| p.container)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PipeKindRegistryBuilder {
    properties: Vec<ConnectorProperties>,
    properties_by_name: HashMap<String, ConnectorPropertiesId>,
    kinds: Vec<(String, PipeKind)>,
    kinds_by_name: HashMap<String, PipeKindId>,
    duplicate: Option<String>,
}

impl PipeKindRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_properties(&mut self, name: &str, props: ConnectorProperties) -> ConnectorPropertiesId {
        let id = ConnectorPropertiesId(self.properties.len() as u32);
        self.properties.push(props);
        if self.properties_by_name.insert(name.to_string(), id).is_some() {
            self.duplicate.get_or_insert_with(|| name.to_string());
        }
        id
    }

    pub fn register_kind(&mut self, name: &str, kind: PipeKind) -> PipeKindId {
        let id = PipeKindId(self.kinds.len() as u32);
        self.kinds.push((name.to_string(), kind));
        if self.kinds_by_name.insert(name.to_string(), id).is_some() {
            self.duplicate.get_or_insert_with(|| name.to_string());
        }
        id
    }

    pub fn properties_id(&self, name: &str) -> Option<ConnectorPropertiesId> {
        self.properties_by_name.get(name).copied()
    }

    /// Validate every cross-reference and freeze.
    pub fn build(self) -> Result<PipeKindRegistry, RegistryError> {
        if let Some(name) = self.duplicate {
            return Err(RegistryError::DuplicateName(name));
        }
        for (name, kind) in &self.kinds {
            if kind.container_volumes.is_empty() {
                return Err(RegistryError::NoContainers(name.clone()));
            }
            if let Some(container) = kind
                .container_volumes
                .iter()
                .position(|v| Volume::checked_from_f64(*v).is_none())
            {
                return Err(RegistryError::InvalidVolume {
                    kind: name.clone(),
                    container,
                });
            }
            if kind.connector.0 as usize >= self.properties.len() {
                return Err(RegistryError::UnknownProperties(kind.connector));
            }
            if let Some(port) = kind
                .ports
                .iter()
                .position(|p| p.container >= kind.container_volumes.len())
            {
                return Err(RegistryError::InvalidPort {
                    kind: name.clone(),
                    port,
                });
            }
        }
        Ok(PipeKindRegistry {
            properties: self.properties,
            properties_by_name: self.properties_by_name,
            kinds: self.kinds,
            kinds_by_name: self.kinds_by_name,
        })
    }
}

// ---------------------------------------------------------------------------
// Frozen registry
// ---------------------------------------------------------------------------

/// Immutable after [`PipeKindRegistryBuilder::build`]. Thread-safe to share.
#[derive(Debug)]
pub struct PipeKindRegistry {
    properties: Vec<ConnectorProperties>,
    properties_by_name: HashMap<String, ConnectorPropertiesId>,
    kinds: Vec<(String, PipeKind)>,
    kinds_by_name: HashMap<String, PipeKindId>,
}

impl PipeKindRegistry {
    pub fn kind(&self, id: PipeKindId) -> Option<&PipeKind> {
        self.kinds.get(id.0 as usize).map(|(_, k)| k)
    }

    pub fn kind_name(&self, id: PipeKindId) -> Option<&str> {
        self.kinds.get(id.0 as usize).map(|(n, _)| n.as_str())
    }

    pub fn kind_id(&self, name: &str) -> Option<PipeKindId> {
        self.kinds_by_name.get(name).copied()
    }

    pub fn properties(&self, id: ConnectorPropertiesId) -> Option<&ConnectorProperties> {
        self.properties.get(id.0 as usize)
    }

    pub fn properties_id(&self, name: &str) -> Option<ConnectorPropertiesId> {
        self.properties_by_name.get(name).copied()
    }

    pub fn kind_count(&self) -> usize {
        self.kinds.len()
    }

    pub fn properties_count(&self) -> usize {
        self.properties.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("pipe kind '{0}' has no containers")]
    NoContainers(String),
    #[error("unknown connector properties: {0:?}")]
    UnknownProperties(ConnectorPropertiesId),
    #[error("pipe kind '{kind}' port {port} names a missing container")]
    InvalidPort { kind: String, port: usize },
    #[error("pipe kind '{kind}' container {container} has an invalid volume")]
    InvalidVolume { kind: String, container: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ConnectorProperties {
        ConnectorProperties {
            shape: ConnectorShape::Round,
            connector_diameter: 0.5,
            flow_area_diameter: 0.3,
        }
    }

    fn straight(connector: ConnectorPropertiesId) -> PipeKind {
        PipeKind {
            ports: vec![
                PortDef {
                    offset: [-1.0, 0.0, 0.0],
                    container: 0,
                },
                PortDef {
                    offset: [1.0, 0.0, 0.0],
                    container: 0,
                },
            ],
            container_volumes: vec![10.0],
            half_extents: [1.0, 0.25, 0.25],
            mass: 0.0,
            connector,
        }
    }

    #[test]
    fn register_and_lookup_by_name() {
        let mut b = PipeKindRegistryBuilder::new();
        let props = b.register_properties("small", small());
        let kind = b.register_kind("straight", straight(props));
        let reg = b.build().unwrap();
        assert_eq!(reg.kind_id("straight"), Some(kind));
        assert_eq!(reg.kind_name(kind), Some("straight"));
        assert_eq!(reg.properties_id("small"), Some(props));
        assert!(reg.kind_id("elbow").is_none());
        assert_eq!(reg.kind_count(), 1);
    }

    #[test]
    fn duplicate_names_fail_build() {
        let mut b = PipeKindRegistryBuilder::new();
        let props = b.register_properties("small", small());
        b.register_kind("straight", straight(props));
        b.register_kind("straight", straight(props));
        assert!(matches!(b.build(), Err(RegistryError::DuplicateName(n)) if n == "straight"));
    }

    #[test]
    fn port_with_missing_container_fails_build() {
        let mut b = PipeKindRegistryBuilder::new();
        let props = b.register_properties("small", small());
        let mut kind = straight(props);
        kind.ports[1].container = 3;
        b.register_kind("broken", kind);
        assert!(matches!(b.build(), Err(RegistryError::InvalidPort { port: 1, .. })));
    }

    #[test]
    fn non_finite_or_negative_volumes_fail_build() {
        for bad in [f64::NAN, f64::INFINITY, -1.0, 1e12] {
            let mut b = PipeKindRegistryBuilder::new();
            let props = b.register_properties("small", small());
            let mut kind = straight(props);
            kind.container_volumes = vec![bad];
            assert_eq!(kind.volumes().next(), Some(Volume::ZERO));
            b.register_kind("leaky", kind);
            assert!(
                matches!(b.build(), Err(RegistryError::InvalidVolume { container: 0, .. })),
                "volume {bad} was accepted"
            );
        }
    }

    #[test]
    fn unknown_properties_fail_build() {
        let mut b = PipeKindRegistryBuilder::new();
        b.register_kind("orphan", straight(ConnectorPropertiesId(4)));
        assert!(matches!(b.build(), Err(RegistryError::UnknownProperties(_))));
    }

    #[test]
    fn kinds_deserialize_from_ron() {
        let src = r#"(
            ports: [(offset: (0.0, 0.0, -1.0), container: 0)],
            container_volumes: [5.0],
            half_extents: (0.25, 0.25, 1.0),
            mass: 0.0,
            connector: 0,
        )"#;
        let kind: PipeKind = ron::from_str(src).unwrap();
        assert_eq!(kind.ports.len(), 1);
        assert_eq!(kind.volumes().next(), Some(Volume::from_f64(5.0)));
    }
}
