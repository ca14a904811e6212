// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Roles, scopes and security principals.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Role of a security principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Role could not be determined.
    Unknown,
    /// Unauthenticated caller.
    Guest,
    /// End user.
    User,
    /// Administrator.
    Admin,
    /// Internal service.
    Service,
    /// Resource provider.
    Provider,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Unknown,
        Role::Guest,
        Role::User,
        Role::Admin,
        Role::Service,
        Role::Provider,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unknown => "UNKNOWN",
            Role::Guest => "GUEST",
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Service => "SERVICE",
            Role::Provider => "PROVIDER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of roles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Roles(u8);

impl Roles {
    /// Every role, including guests.
    pub const PUBLIC: Roles = Roles::of(&Role::ALL);
    /// Any authenticated principal.
    pub const AUTHENTICATED: Roles =
        Roles::of(&[Role::User, Role::Admin, Role::Service, Role::Provider]);
    /// Human users.
    pub const END_USER: Roles = Roles::of(&[Role::User, Role::Admin]);
    pub const PRIVILEGED: Roles = Roles::of(&[Role::Admin, Role::Service]);
    pub const SERVICE: Roles = Roles::of(&[Role::Service]);
    pub const ADMIN: Roles = Roles::of(&[Role::Admin]);
    /// Providers, plus services acting on their behalf.
    pub const PROVIDER: Roles = Roles::of(&[Role::Provider, Role::Service]);

    pub const fn empty() -> Self {
        Roles(0)
    }

    pub const fn of(roles: &[Role]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < roles.len() {
            bits |= roles[i].bit();
            i += 1;
        }
        Roles(bits)
    }

    pub const fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub const fn union(self, other: Roles) -> Self {
        Roles(self.0 | other.0)
    }

    pub const fn with(self, role: Role) -> Self {
        Roles(self.0 | role.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl fmt::Debug for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<Role> for Roles {
    fn from(role: Role) -> Self {
        Roles::empty().with(role)
    }
}

impl FromIterator<Role> for Roles {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        iter.into_iter().fold(Roles::empty(), Roles::with)
    }
}

/// Access level of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessRight {
    Read,
    ReadWrite,
}

impl AccessRight {
    pub fn scope_name(self) -> &'static str {
        match self {
            AccessRight::Read => "read",
            AccessRight::ReadWrite => "write",
        }
    }
}

/// Error returned when a scope string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid security scope '{0}'")]
pub struct InvalidScope(pub String);

/// A permission of the form `segment.segment:access`, e.g. `files.upload:write`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityScope {
    segments: Vec<String>,
    access: AccessRight,
}

impl SecurityScope {
    /// Segment granting every call.
    pub const ALL_SEGMENT: &'static str = "all";

    /// Construct a scope from a dotted name such as `files.upload`.
    pub fn new(name: &str, access: AccessRight) -> Result<Self, InvalidScope> {
        let segments: Vec<String> = name.split('.').map(str::to_string).collect();
        let valid = segments.iter().all(|s| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
        if !valid {
            return Err(InvalidScope(name.to_string()));
        }
        Ok(Self { segments, access })
    }

    /// Default scope of a call: its full name with the given access.
    pub fn for_call(full_name: &str, access: AccessRight) -> Self {
        Self {
            segments: full_name
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            access,
        }
    }

    /// `all:write`, the default scope of a freshly issued token.
    pub fn all_write() -> Self {
        Self {
            segments: vec![Self::ALL_SEGMENT.to_string()],
            access: AccessRight::ReadWrite,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn access(&self) -> AccessRight {
        self.access
    }

    /// Whether a token holding `granted` may use this scope.
    ///
    /// The granted access must be at least this access, and the granted segments must be
    /// `all` or a prefix of this scope's segments.
    pub fn is_covered_by(&self, granted: &SecurityScope) -> bool {
        if granted.access < self.access {
            return false;
        }
        if granted.segments.len() == 1 && granted.segments[0] == Self::ALL_SEGMENT {
            return true;
        }
        granted.segments.len() <= self.segments.len()
            && granted
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(g, r)| g == r)
    }

    /// Whether any of `granted` covers this scope.
    pub fn is_covered_by_any<'a>(&self, granted: impl IntoIterator<Item = &'a SecurityScope>) -> bool {
        granted.into_iter().any(|g| self.is_covered_by(g))
    }
}

impl fmt::Display for SecurityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segments.join("."), self.access.scope_name())
    }
}

impl FromStr for SecurityScope {
    type Err = InvalidScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, access) = s.split_once(':').ok_or_else(|| InvalidScope(s.to_string()))?;
        let access = match access {
            "read" => AccessRight::Read,
            "write" => AccessRight::ReadWrite,
            _ => return Err(InvalidScope(s.to_string())),
        };
        SecurityScope::new(name, access).map_err(|_| InvalidScope(s.to_string()))
    }
}

impl Serialize for SecurityScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SecurityScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity behind a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPrincipal {
    pub username: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<String>,
}

/// A validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPrincipalToken {
    pub principal: SecurityPrincipal,
    pub scopes: Vec<SecurityScope>,
    /// Issue time, seconds since the epoch.
    pub issued_at: i64,
    /// Expiry time, seconds since the epoch.
    pub expires_at: i64,
    pub public_session_reference: Option<String>,
    pub extended_by: Option<String>,
    pub extended_by_chain: Vec<String>,
}

impl SecurityPrincipalToken {
    /// Whether the granted scopes cover `required`.
    pub fn covers(&self, required: &SecurityScope) -> bool {
        required.is_covered_by_any(&self.scopes)
    }
}
