use crate::errors::ApiError;
use std::fmt;
use std::str::FromStr;

/// Resource names that custom fields, field groups and tags can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Leads,
    Contacts,
    Companies,
    Customers,
    Catalogs,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Leads,
        EntityType::Contacts,
        EntityType::Companies,
        EntityType::Customers,
        EntityType::Catalogs,
    ];

    /// Path segment used by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Leads => "leads",
            EntityType::Contacts => "contacts",
            EntityType::Companies => "companies",
            EntityType::Customers => "customers",
            EntityType::Catalogs => "catalogs",
        }
    }

    /// Parses `value` and checks it against the subset a service accepts.
    pub fn parse_scoped(value: &str, allowed: &[EntityType]) -> Result<Self, ApiError> {
        let entity_type: EntityType = value.parse()?;
        if allowed.contains(&entity_type) {
            Ok(entity_type)
        } else {
            Err(ApiError::InvalidEntityType(value.to_string()))
        }
    }
}

impl FromStr for EntityType {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|entity_type| entity_type.as_str() == value)
            .ok_or_else(|| ApiError::InvalidEntityType(value.to_string()))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
