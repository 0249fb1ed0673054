use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::error::UniqueField;

#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Closed set of roles a user may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Normal,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Normal => "NORMAL",
        }
    }

    /// Role set every created or updated user ends up with.
    pub fn default_set() -> BTreeSet<Role> {
        BTreeSet::from([Role::Normal])
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "NORMAL" => Ok(Role::Normal),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Other => "OTHER",
        }
    }
}

impl FromStr for Gender {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MALE" => Ok(Gender::Male),
            "FEMALE" => Ok(Gender::Female),
            "OTHER" => Ok(Gender::Other),
            other => Err(ParseEnumError::new("gender", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipStatus {
    Single,
    InARelationship,
    Engaged,
    Married,
    Divorced,
    Widowed,
    Complicated,
    OpenRelationship,
    InASeparation,
}

impl RelationshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipStatus::Single => "SINGLE",
            RelationshipStatus::InARelationship => "IN_A_RELATIONSHIP",
            RelationshipStatus::Engaged => "ENGAGED",
            RelationshipStatus::Married => "MARRIED",
            RelationshipStatus::Divorced => "DIVORCED",
            RelationshipStatus::Widowed => "WIDOWED",
            RelationshipStatus::Complicated => "COMPLICATED",
            RelationshipStatus::OpenRelationship => "OPEN_RELATIONSHIP",
            RelationshipStatus::InASeparation => "IN_A_SEPARATION",
        }
    }
}

impl FromStr for RelationshipStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINGLE" => Ok(RelationshipStatus::Single),
            "IN_A_RELATIONSHIP" => Ok(RelationshipStatus::InARelationship),
            "ENGAGED" => Ok(RelationshipStatus::Engaged),
            "MARRIED" => Ok(RelationshipStatus::Married),
            "DIVORCED" => Ok(RelationshipStatus::Divorced),
            "WIDOWED" => Ok(RelationshipStatus::Widowed),
            "COMPLICATED" => Ok(RelationshipStatus::Complicated),
            "OPEN_RELATIONSHIP" => Ok(RelationshipStatus::OpenRelationship),
            "IN_A_SEPARATION" => Ok(RelationshipStatus::InASeparation),
            other => Err(ParseEnumError::new("relationship status", other)),
        }
    }
}

/// Profile fields shared by creation and full-replace updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub country: Option<String>,
    pub gender: Option<Gender>,
    pub relationship_status: Option<RelationshipStatus>,
    pub bio: Option<String>,
}

impl Profile {
    pub fn unique_value(&self, field: UniqueField) -> &str {
        match field {
            UniqueField::Username => &self.username,
            UniqueField::Email => &self.email,
            UniqueField::Phone => &self.phone,
        }
    }
}

/// User record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,                               // assigned by the store
    pub profile: Profile,
    pub password_hash: String,                 // argon2 PHC string
    pub profile_picture: Option<String>,       // blob key
    pub roles: BTreeSet<Role>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    pub fn username(&self) -> &str {
        &self.profile.username
    }
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub profile: Profile,
    pub password_hash: String,
    pub profile_picture: Option<String>,
    pub roles: BTreeSet<Role>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Current time truncated to the microsecond precision Postgres keeps.
pub fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

/// Next `updated_at` value: now, unless the clock has not moved past `previous`.
pub fn next_updated_at(previous: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub country: Option<String>,
    pub gender: Option<String>,
    pub relationship_status: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub roles: Vec<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = ParseEnumError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let roles = r
            .roles
            .iter()
            .map(|s| s.parse::<Role>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            id: r.id,
            profile: Profile {
                first_name: r.first_name,
                middle_name: r.middle_name,
                last_name: r.last_name,
                username: r.username,
                email: r.email,
                phone: r.phone,
                country: r.country,
                gender: r.gender.as_deref().map(str::parse::<Gender>).transpose()?,
                relationship_status: r
                    .relationship_status
                    .as_deref()
                    .map(str::parse::<RelationshipStatus>)
                    .transpose()?,
                bio: r.bio,
            },
            password_hash: r.password_hash,
            profile_picture: r.profile_picture,
            roles,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}
