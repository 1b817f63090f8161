use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Identity of the well-known root record every operation is read from.
pub const ROOT_ID: &str = "client:root";

/// Typename stamped on the root record.
pub const ROOT_TYPE: &str = "__Root";

const CLIENT_PREFIX: &str = "client:";

/// Stable identity of one normalized entity.
///
/// A `DataId` is an opaque string. It is cheap to clone (the text is shared)
/// and hashes exactly like the underlying `str`, so maps keyed by `DataId`
/// can be probed with a plain `&str`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(Arc<str>);

impl DataId {
    /// Create an identity from any string. Empty identities are rejected.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() {
            return Err(TypeError::InvalidDataId("identity must not be empty".into()));
        }
        Ok(Self(Arc::from(s)))
    }

    /// Identity of the root record.
    pub fn root() -> Self {
        Self(Arc::from(ROOT_ID))
    }

    /// Derive the client identity of a linked record that carries no server id.
    ///
    /// The result is `client:<parent>:<storage_key>`, with `:<index>`
    /// appended for an element of a plural link.
    pub fn client(parent: &DataId, storage_key: &str, index: Option<usize>) -> Self {
        let text = match index {
            Some(i) => format!("{CLIENT_PREFIX}{parent}:{storage_key}:{i}"),
            None => format!("{CLIENT_PREFIX}{parent}:{storage_key}"),
        };
        Self(Arc::from(text))
    }

    /// Returns `true` for identities generated on the client.
    pub fn is_client_id(&self) -> bool {
        self.0.starts_with(CLIENT_PREFIX)
    }

    /// Returns `true` for the root identity.
    pub fn is_root(&self) -> bool {
        &*self.0 == ROOT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DataId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for DataId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Borrow<str> for DataId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DataId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({})", self.0)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for DataId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DataId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DataId::parse(&s).map_err(serde::de::Error::custom)
    }
}
