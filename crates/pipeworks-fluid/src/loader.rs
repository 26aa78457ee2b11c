//! Two-pass scene loader.
//!
//! Scenes are RON documents naming pipes and connectors by string id.
//! Connectors may refer to pipes listed anywhere in the file, so loading
//! runs in two passes:
//!
//! 1. Build every pipe skeleton and every connector (unbound), recording the
//!    links each connector asks for.
//! 2. Resolve every recorded link. An id that names no pipe fails the load.
//!
//! Ports left without a connector afterwards get a fresh half-open one. The
//! whole run holds a [`LoadGuard`](pipeworks_core::world::LoadGuard), so the
//! tick loop cannot start halfway through. A failed load removes everything
//! it created.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use glam::{Quat, Vec3};
use pipeworks_core::fixed::Portion;
use pipeworks_physics::Transform;
use serde::{Deserialize, Serialize};

use crate::connector::{Side, Transition};
use crate::container::ResourceContainer;
use crate::id::{ConnectorId, PipeId, PortRef};
use crate::network::{NetworkError, NetworkEvent, PipeNetwork};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("scene parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Two scene entries share an id.
    #[error("duplicate scene id '{0}'")]
    DuplicateReference(String),

    /// A connector names a pipe the scene does not contain.
    #[error("connector '{connector}' refers to unknown pipe '{target}'")]
    UnresolvedReference { connector: String, target: String },

    #[error("unknown connector properties '{0}'")]
    UnknownProperties(String),

    /// The pipe port nearest the connector is already bound.
    #[error("connector '{connector}' lands on port {port} of pipe '{pipe}', which is already bound")]
    SideOccupied {
        connector: String,
        pipe: String,
        port: usize,
    },

    /// A fill level that is not a number in `[0, 1]`.
    #[error("pipe '{pipe}' has invalid contents {value}")]
    InvalidContents { pipe: String, value: f64 },

    #[error("connector '{0}' names no pipe on either side")]
    OrphanConnector(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

// ===========================================================================
// Scene schema
// ===========================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneData {
    #[serde(default)]
    pub pipes: Vec<PipeData>,
    #[serde(default)]
    pub connectors: Vec<ConnectorData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeData {
    pub id: String,
    /// Registered kind name.
    pub kind: String,
    pub position: [f32; 3],
    /// Quaternion `(x, y, z, w)`. Identity when absent.
    #[serde(default)]
    pub rotation: Option<[f32; 4]>,
    /// Fullness per container, 0.0 to 1.0. Missing entries mean empty.
    #[serde(default)]
    pub contents: Vec<f64>,
}

impl PipeData {
    fn transform(&self) -> Transform {
        let rotation = self
            .rotation
            .map(|r| Quat::from_array(r).normalize())
            .filter(|q| q.is_finite())
            .unwrap_or(Quat::IDENTITY);
        Transform::new(Vec3::from_array(self.position), rotation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorData {
    pub id: String,
    pub position: [f32; 3],
    /// Registered properties name. Defaults to those of the first linked
    /// pipe's kind.
    #[serde(default)]
    pub properties: Option<String>,
    /// Pipe id attached on side A.
    #[serde(default)]
    pub a: Option<String>,
    /// Pipe id attached on side B.
    #[serde(default)]
    pub b: Option<String>,
}

impl ConnectorData {
    fn links(&self) -> impl Iterator<Item = (Side, &str)> {
        [(Side::A, self.a.as_deref()), (Side::B, self.b.as_deref())]
            .into_iter()
            .filter_map(|(side, target)| target.map(|t| (side, t)))
    }
}

/// Scene ids mapped to what they became.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub pipes: HashMap<String, PipeId>,
    pub connectors: HashMap<String, ConnectorId>,
    /// Connectors created for ports the scene left open.
    pub spawned_connectors: Vec<ConnectorId>,
}

impl LoadReport {
    pub fn pipe(&self, id: &str) -> Option<PipeId> {
        self.pipes.get(id).copied()
    }

    pub fn connector(&self, id: &str) -> Option<ConnectorId> {
        self.connectors.get(id).copied()
    }
}

// ===========================================================================
// Entry points
// ===========================================================================

pub fn load_scene_str<C: ResourceContainer>(network: &PipeNetwork<C>, src: &str) -> Result<LoadReport, LoadError> {
    let scene: SceneData = ron::from_str(src)?;
    load_scene(network, &scene)
}

pub fn load_scene_file<C: ResourceContainer>(network: &PipeNetwork<C>, path: &Path) -> Result<LoadReport, LoadError> {
    let src = std::fs::read_to_string(path)?;
    load_scene_str(network, &src)
}

/// Populate `network` from `scene`. Nothing is left behind on failure.
pub fn load_scene<C: ResourceContainer>(network: &PipeNetwork<C>, scene: &SceneData) -> Result<LoadReport, LoadError> {
    let _gate = network.world().begin_load();
    let mut report = LoadReport::default();
    match run_passes(network, scene, &mut report) {
        Ok(events) => {
            tracing::info!(
                pipes = report.pipes.len(),
                connectors = report.connectors.len() + report.spawned_connectors.len(),
                "scene loaded"
            );
            network.announce(&events);
            Ok(report)
        }
        Err(e) => {
            tracing::warn!(error = %e, "scene load failed; rolling back");
            for pipe in report.pipes.values() {
                network.discard_pipe(*pipe);
            }
            for connector in report.connectors.values().chain(&report.spawned_connectors) {
                network.discard_connector(*connector);
            }
            Err(e)
        }
    }
}

struct PendingLink<'a> {
    connector: &'a ConnectorData,
    id: ConnectorId,
    side: Side,
    target: &'a str,
}

fn run_passes<'a, C: ResourceContainer>(
    network: &PipeNetwork<C>,
    scene: &'a SceneData,
    report: &mut LoadReport,
) -> Result<Vec<NetworkEvent>, LoadError> {
    let registry = network.registry();

    // -- Pass 1: skeletons ------------------------------------------------

    for data in &scene.pipes {
        if report.pipes.contains_key(&data.id) {
            return Err(LoadError::DuplicateReference(data.id.clone()));
        }
        let kind = registry
            .kind_id(&data.kind)
            .ok_or_else(|| NetworkError::UnknownKind(data.kind.clone()))?;
        let fullness = data
            .contents
            .iter()
            .map(|&value| {
                Portion::checked_from_f64(value).ok_or_else(|| LoadError::InvalidContents {
                    pipe: data.id.clone(),
                    value,
                })
            })
            .collect::<Result<Vec<Portion>, LoadError>>()?;
        let pipe = network.insert_pipe(kind, data.transform(), &fullness)?;
        report.pipes.insert(data.id.clone(), pipe.id());
    }

    let mut pending: Vec<PendingLink<'a>> = Vec::new();
    for data in &scene.connectors {
        if report.connectors.contains_key(&data.id) || report.pipes.contains_key(&data.id) {
            return Err(LoadError::DuplicateReference(data.id.clone()));
        }
        if data.a.is_none() && data.b.is_none() {
            return Err(LoadError::OrphanConnector(data.id.clone()));
        }
        let properties = match &data.properties {
            Some(name) => registry
                .properties_id(name)
                .ok_or_else(|| LoadError::UnknownProperties(name.clone()))?,
            None => {
                let (_, first) = data
                    .links()
                    .next()
                    .ok_or_else(|| LoadError::OrphanConnector(data.id.clone()))?;
                let kind = scene
                    .pipes
                    .iter()
                    .find(|p| p.id == first)
                    .and_then(|p| registry.kind_id(&p.kind))
                    .and_then(|k| registry.kind(k))
                    .ok_or_else(|| LoadError::UnresolvedReference {
                        connector: data.id.clone(),
                        target: first.to_string(),
                    })?;
                kind.connector
            }
        };
        let transform = Transform::from_translation(Vec3::from_array(data.position));
        let connector = network.insert_connector(transform, properties)?;
        report.connectors.insert(data.id.clone(), connector.id());
        for (side, target) in data.links() {
            pending.push(PendingLink {
                connector: data,
                id: connector.id(),
                side,
                target,
            });
        }
    }

    // -- Pass 2: resolve --------------------------------------------------

    let mut joined = Vec::new();
    let mut connected = HashSet::new();
    for link in &pending {
        let pipe_id = report
            .pipe(link.target)
            .ok_or_else(|| LoadError::UnresolvedReference {
                connector: link.connector.id.clone(),
                target: link.target.to_string(),
            })?;
        let pipe = network.pipe(pipe_id).ok_or(NetworkError::DanglingPipe(pipe_id))?;
        let connector = network
            .connector(link.id)
            .ok_or(NetworkError::DanglingConnector(link.id))?;
        let port = pipe
            .nearest_port(Vec3::from_array(link.connector.position))
            .ok_or(NetworkError::InvalidPort { pipe: pipe_id, port: 0 })?;
        if pipe.connector_at(port).is_some() {
            return Err(LoadError::SideOccupied {
                connector: link.connector.id.clone(),
                pipe: link.target.to_string(),
                port,
            });
        }
        let transition = connector
            .connect_at(link.side, PortRef::new(pipe_id, port))
            .map_err(NetworkError::from)?;
        pipe.set_connector(port, Some(link.id));
        if transition == Transition::Connected && connected.insert(link.id) {
            joined.push(NetworkEvent::Connected(link.id));
        }
    }

    // -- Open ports -------------------------------------------------------

    let mut events = Vec::new();
    for data in &scene.pipes {
        let Some(pipe_id) = report.pipe(&data.id) else {
            continue;
        };
        let pipe = network.pipe(pipe_id).ok_or(NetworkError::DanglingPipe(pipe_id))?;
        let kind = registry
            .kind(pipe.kind())
            .ok_or_else(|| NetworkError::UnknownKind(data.kind.clone()))?;
        for port in 0..pipe.port_count() {
            if pipe.connector_at(port).is_some() {
                continue;
            }
            let Some(position) = pipe.port_position(port) else {
                continue;
            };
            let connector = network.insert_connector(Transform::from_translation(position), kind.connector)?;
            report.spawned_connectors.push(connector.id());
            connector
                .connect(PortRef::new(pipe_id, port))
                .map_err(NetworkError::from)?;
            pipe.set_connector(port, Some(connector.id()));
        }
        events.push(NetworkEvent::PipeBuilt(pipe_id));
    }

    events.extend(joined);
    Ok(events)
}
