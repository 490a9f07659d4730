#![deny(missing_docs)]
//! Core type definitions for the kiosk tunnel.
//!
//! Both ends of the bridge speak through this crate: the Server and the
//! kiosk-side Proxy share
//!
//! * the [`KioskId`] newtype,
//! * the wire protocol - request envelopes, reply conventions, error tags
//!   and close reasons (see the [`wire`] module),
//! * the registry records describing kiosk state and connection history
//!   (see the [`registry`] module).
//!
//! Keeping these in one place means a field rename or a new error tag
//! cannot silently drift between the two binaries.

use std::{convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod registry;
pub mod wire;

/// The opaque identifier of a kiosk.
///
/// Assigned when the kiosk is registered and carried in the authentication
/// token, the routing header and all registry records.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KioskId(String);

impl KioskId {
    /// Wraps an identifier string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts the identifier into the wrapped `String`.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for KioskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KioskId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for KioskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for KioskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
