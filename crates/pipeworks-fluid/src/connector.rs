//! The two-sided connector state machine.
//!
//! ```text
//!   Unbound   --connect-->      HalfOpen(other side)
//!   HalfOpen  --connect-->      Connected
//!   Connected --disconnect(s)-> HalfOpen(s)
//!   HalfOpen  --disconnect-->   Disposed
//! ```
//!
//! Invariant: `vacant_side` is `None` exactly when both sides are occupied.

use serde::{Deserialize, Serialize};

use crate::id::ConnectorId;

/// One end of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// Observable state of a [`Connector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Created empty by a loader; nothing attached yet.
    Unbound,
    /// One side attached, the given side vacant.
    HalfOpen(Side),
    Connected,
    Disposed,
}

/// What a successful `connect` or `disconnect` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A side was filled and `vacant` is still open.
    HalfOpen { vacant: Side },
    /// Both sides are now filled.
    Connected,
    /// A side was vacated while the other stays attached.
    Opened { vacant: Side },
    /// The last side was vacated. The connector is disposed.
    Emptied,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector {connector:?}: {reason} (side {side:?})")]
    InvalidState {
        connector: ConnectorId,
        side: Option<Side>,
        reason: &'static str,
    },
    #[error("connector {0:?} has been disposed")]
    Dangling(ConnectorId),
}

/// A two-sided attachment point holding at most one `T` per side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector<T> {
    id: ConnectorId,
    sides: [Option<T>; 2],
    vacant_side: Option<Side>,
    disposed: bool,
}

impl<T: Copy + Eq> Connector<T> {
    /// A connector with nothing attached. Side A is filled first.
    pub fn unbound(id: ConnectorId) -> Self {
        Self {
            id,
            sides: [None, None],
            vacant_side: Some(Side::A),
            disposed: false,
        }
    }

    /// A connector whose `vacant` side is open and whose other side holds
    /// `occupant`.
    pub fn half_open(id: ConnectorId, vacant: Side, occupant: T) -> Self {
        let mut sides = [None, None];
        sides[vacant.opposite().index()] = Some(occupant);
        Self {
            id,
            sides,
            vacant_side: Some(vacant),
            disposed: false,
        }
    }

    pub fn id(&self) -> ConnectorId {
        self.id
    }

    pub fn vacant_side(&self) -> Option<Side> {
        self.vacant_side
    }

    pub fn occupant(&self, side: Side) -> Option<T> {
        self.sides[side.index()]
    }

    pub fn occupants(&self) -> [Option<T>; 2] {
        self.sides
    }

    /// The side `item` is attached on, if any.
    pub fn side_of(&self, item: T) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|s| self.sides[s.index()] == Some(item))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn state(&self) -> ConnectorState {
        if self.disposed {
            return ConnectorState::Disposed;
        }
        match (self.vacant_side, self.sides) {
            (None, _) => ConnectorState::Connected,
            (Some(_), [None, None]) => ConnectorState::Unbound,
            (Some(side), _) => ConnectorState::HalfOpen(side),
        }
    }

    /// Whether the vacancy invariant holds.
    pub fn is_consistent(&self) -> bool {
        let both = self.sides.iter().all(Option::is_some);
        self.vacant_side.is_none() == both
            && self
                .vacant_side
                .is_none_or(|s| self.sides[s.index()].is_none())
    }

    /// Attach `item` on the vacant side.
    pub fn connect(&mut self, item: T) -> Result<Transition, ConnectorError> {
        self.check_live()?;
        let side = self.vacant_side.ok_or(ConnectorError::InvalidState {
            connector: self.id,
            side: None,
            reason: "no vacant side",
        })?;
        self.connect_at(side, item)
    }

    /// Attach `item` on a specific side, which must be empty.
    pub fn connect_at(&mut self, side: Side, item: T) -> Result<Transition, ConnectorError> {
        self.check_live()?;
        if self.sides[side.index()].is_some() {
            return Err(ConnectorError::InvalidState {
                connector: self.id,
                side: Some(side),
                reason: "side already occupied",
            });
        }
        self.sides[side.index()] = Some(item);
        let other = side.opposite();
        if self.sides[other.index()].is_some() {
            self.vacant_side = None;
            Ok(Transition::Connected)
        } else {
            self.vacant_side = Some(other);
            Ok(Transition::HalfOpen { vacant: other })
        }
    }

    /// Detach whatever is on `side`. Returns the detached item and the
    /// transition; vacating the last side disposes the connector.
    pub fn disconnect(&mut self, side: Side) -> Result<(T, Transition), ConnectorError> {
        self.check_live()?;
        let item = self.sides[side.index()].take().ok_or(ConnectorError::InvalidState {
            connector: self.id,
            side: Some(side),
            reason: "side already vacant",
        })?;
        self.vacant_side = Some(side);
        if self.sides[side.opposite().index()].is_none() {
            self.disposed = true;
            return Ok((item, Transition::Emptied));
        }
        Ok((item, Transition::Opened { vacant: side }))
    }

    /// Force the disposed state, dropping both occupants.
    pub fn dispose(&mut self) {
        self.sides = [None, None];
        self.vacant_side = Some(Side::A);
        self.disposed = true;
    }

    fn check_live(&self) -> Result<(), ConnectorError> {
        if self.disposed {
            Err(ConnectorError::Dangling(self.id))
        } else {
            Ok(())
        }
    }
}
