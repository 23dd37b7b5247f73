use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::key::AttributeKey;
use crate::value::Value;
use crate::version::Version;

/// Where a held value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Committed by the given session (possibly this one).
    Session(SessionId),
    /// Fetched from the durable store or announced without a session.
    Remote,
}

impl Origin {
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Origin::Session(id) => Some(*id),
            Origin::Remote => None,
        }
    }
}

/// A payload together with the version and origin that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: Value,
    pub version: Version,
    pub origin: Origin,
}

impl AttributeValue {
    pub fn new(value: Value, version: Version, origin: Origin) -> Self {
        Self {
            value,
            version,
            origin,
        }
    }

    pub fn is_newer_than(&self, version: Version) -> bool {
        self.version > version
    }
}

/// Change announcement carried on both broadcast paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub key: AttributeKey,
    pub value: Value,
    pub version: Version,
    pub origin_session: Option<SessionId>,
}

impl SyncEvent {
    pub fn from_attribute(key: AttributeKey, attribute: &AttributeValue) -> Self {
        Self {
            key,
            value: attribute.value.clone(),
            version: attribute.version,
            origin_session: attribute.origin.session(),
        }
    }

    pub fn origin(&self) -> Origin {
        match self.origin_session {
            Some(id) => Origin::Session(id),
            None => Origin::Remote,
        }
    }

    pub fn to_attribute(&self) -> AttributeValue {
        AttributeValue::new(self.value.clone(), self.version, self.origin())
    }
}
