use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Identity of an initialized session, handed to the host once it is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Version string reported by the runtime.
    pub version: String,
    /// Console banner; only set in console mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Packages to make available before the session is ready.
///
/// On the wire this is a two-element array of groups: prebuilt packages the
/// runtime loads directly, then packages that go through the installer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PackageGroups", into = "PackageGroups")]
pub struct PackageSpecs {
    pub prebuilt: Vec<String>,
    pub installable: Vec<String>,
}

impl PackageSpecs {
    #[must_use]
    pub fn new(prebuilt: Vec<String>, installable: Vec<String>) -> Self {
        Self { prebuilt, installable }
    }
}

#[derive(Serialize, Deserialize)]
struct PackageGroups(#[serde(default)] Vec<String>, #[serde(default)] Vec<String>);

impl From<PackageGroups> for PackageSpecs {
    fn from(PackageGroups(prebuilt, installable): PackageGroups) -> Self {
        Self { prebuilt, installable }
    }
}

impl From<PackageSpecs> for PackageGroups {
    fn from(specs: PackageSpecs) -> Self {
        Self(specs.prebuilt, specs.installable)
    }
}
