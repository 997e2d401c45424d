use serde::{Deserialize, Serialize};

/// A named profile on an external platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Display name from the lookup table
    pub name: String,
    /// Organizational segment/category
    pub segment: String,
    /// Platform-specific opaque identifier
    pub id: String,
}

impl IdentityRecord {
    pub fn new(name: impl Into<String>, segment: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segment: segment.into(),
            id: id.into(),
        }
    }
}
