//! Pipeworks Fluid -- pipes, connectors, and the flow protocol between them.
//!
//! A network is a set of [`pipe::Pipe`]s joined at their ports by
//! [`pipe_connector::PipeConnector`]s. Both are entities ticked by the
//! simulation world. Each tick a connected connector equalizes the fullness
//! of the two containers it joins:
//!
//! ```text
//! amount = donor.volume * |fa - fb| * tick_interval
//! ```
//!
//! flowing from the fuller side to the emptier one. Flow stops below a
//! configurable fullness difference.
//!
//! # Key Types
//!
//! - [`network::PipeNetwork`] -- Build, join, and tear down pipes.
//! - [`connector::Connector`] -- Two-sided state machine with a vacancy invariant.
//! - [`pipe_connector::PipeConnector`] -- Junction entity, its colliders, and flow.
//! - [`container::ResourceContainer`] -- Capacity, fullness, and transfer contract.
//! - [`registry::PipeKindRegistry`] -- Frozen table of pipe kinds.
//! - [`loader`] -- Two-pass RON scene loading.

pub mod connector;
pub mod container;
pub mod id;
pub mod loader;
pub mod network;
pub mod pipe;
pub mod pipe_connector;
pub mod registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use connector::{ConnectorState, Side};
pub use container::{FluidContainer, ResourceContainer};
pub use id::{ConnectorId, PipeId, PipeKindId, PortRef};
pub use network::{NetworkError, NetworkEvent, PipeNetwork};
