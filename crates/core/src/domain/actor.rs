use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed set of roles handed to the engine by the identity provider, listed
/// in ascending order of authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Advertiser,
    Agency,
    Distributor,
    Operator,
    Developer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Guest,
        Role::Advertiser,
        Role::Agency,
        Role::Distributor,
        Role::Operator,
        Role::Developer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Advertiser => "advertiser",
            Self::Agency => "agency",
            Self::Distributor => "distributor",
            Self::Operator => "operator",
            Self::Developer => "developer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "guest" => Some(Self::Guest),
            "advertiser" | "user" | "regular" | "regular_user" => Some(Self::Advertiser),
            "agency" => Some(Self::Agency),
            "distributor" => Some(Self::Distributor),
            "operator" => Some(Self::Operator),
            "developer" | "admin" => Some(Self::Developer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The "current actor" resolved by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: ActorId(id.into()), role }
    }
}
