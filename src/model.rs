//! Principal and permission entities

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Name of the reserved database owner principal
pub const DBO: &str = "dbo";

/// Server-level login
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub name: String,
    #[serde(default)]
    pub principal_id: i64,
    #[serde(default)]
    pub login_type: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub external: bool,
    /// Write-only: never populated by reads
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub default_database: String,
    #[serde(default)]
    pub default_language: String,
}

/// Changes to apply to an existing login; `None` leaves a field unchanged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoginUpdate {
    pub password: Option<String>,
    pub default_database: Option<String>,
    pub default_language: Option<String>,
    pub disabled: Option<bool>,
}

impl LoginUpdate {
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.default_database.is_none()
            && self.default_language.is_none()
            && self.disabled.is_none()
    }
}

/// Database-level user
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub principal_id: i64,
    #[serde(default)]
    pub contained: bool,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub login_name: Option<String>,
    /// Write-only: never populated by reads
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub default_schema: String,
    #[serde(default)]
    pub default_language: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub object_id: Option<String>,
}

impl User {
    /// Check the contained/external/login/password combination.
    pub fn validate_variant(&self) -> Result<()> {
        if self.contained {
            let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
            if has_password == self.external {
                return Err(if self.external {
                    Error::invalid("a password cannot be set for an external contained user")
                } else {
                    Error::invalid("a password is required for a contained user")
                });
            }
            if self.login_name.is_some() {
                return Err(Error::invalid("a contained user cannot be mapped to a login"));
            }
        } else {
            if self.login_name.as_deref().map_or(true, str::is_empty) {
                return Err(Error::invalid("login_name is required for a user that is not contained"));
            }
            if self.password.is_some() {
                return Err(Error::invalid("a password can only be set for a contained user"));
            }
            if !self.default_language.is_empty() {
                return Err(Error::invalid("default_language can only be set for a contained user"));
            }
        }
        if self.object_id.is_some() && !self.external {
            return Err(Error::invalid("object_id can only be set for an external user"));
        }
        Ok(())
    }
}

/// Changes to apply to an existing user; `None` leaves a field unchanged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub password: Option<String>,
    pub default_schema: Option<String>,
    pub default_language: Option<String>,
    pub login_name: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.default_schema.is_none()
            && self.default_language.is_none()
            && self.login_name.is_none()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("name", &self.name)
            .field("principal_id", &self.principal_id)
            .field("login_type", &self.login_type)
            .field("disabled", &self.disabled)
            .field("external", &self.external)
            .field("password", &redacted(&self.password))
            .field("default_database", &self.default_database)
            .field("default_language", &self.default_language)
            .finish()
    }
}

impl std::fmt::Debug for LoginUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginUpdate")
            .field("password", &redacted(&self.password))
            .field("default_database", &self.default_database)
            .field("default_language", &self.default_language)
            .field("disabled", &self.disabled)
            .finish()
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("principal_id", &self.principal_id)
            .field("contained", &self.contained)
            .field("external", &self.external)
            .field("login_name", &self.login_name)
            .field("password", &redacted(&self.password))
            .field("default_schema", &self.default_schema)
            .field("default_language", &self.default_language)
            .field("sid", &self.sid)
            .field("object_id", &self.object_id)
            .finish()
    }
}

impl std::fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserUpdate")
            .field("password", &redacted(&self.password))
            .field("default_schema", &self.default_schema)
            .field("default_language", &self.default_language)
            .field("login_name", &self.login_name)
            .finish()
    }
}

/// Lookup key for a login or user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrincipalRef {
    pub name: Option<String>,
    pub principal_id: Option<i64>,
}

impl PrincipalRef {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            principal_id: None,
        }
    }

    pub fn by_id(principal_id: i64) -> Self {
        Self {
            name: None,
            principal_id: Some(principal_id),
        }
    }
}

/// Whether a role lives at server or database scope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleScope {
    Server,
    Database,
}

impl RoleScope {
    pub fn not_found(&self) -> Error {
        match self {
            RoleScope::Server => Error::NotFound(crate::error::NotFoundKind::ServerRole),
            RoleScope::Database => Error::NotFound(crate::error::NotFoundKind::DatabaseRole),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub principal_id: i64,
    #[serde(default)]
    pub role_type: String,
    #[serde(default)]
    pub type_description: String,
    /// Owner name; empty means the backend default
    #[serde(default)]
    pub owning_principal: String,
    #[serde(default)]
    pub is_fixed_role: bool,
}

const FIXED_DATABASE_ROLES: &[&str] = &[
    "public",
    "db_owner",
    "db_accessadmin",
    "db_securityadmin",
    "db_ddladmin",
    "db_backupoperator",
    "db_datareader",
    "db_datawriter",
    "db_denydatareader",
    "db_denydatawriter",
];

const FIXED_SERVER_ROLES: &[&str] = &[
    "public",
    "sysadmin",
    "serveradmin",
    "securityadmin",
    "processadmin",
    "setupadmin",
    "bulkadmin",
    "diskadmin",
    "dbcreator",
];

/// Whether `name` is one of the backend's built-in roles for `scope`
pub fn is_fixed_role_name(scope: RoleScope, name: &str) -> bool {
    let names = match scope {
        RoleScope::Server => FIXED_SERVER_ROLES,
        RoleScope::Database => FIXED_DATABASE_ROLES,
    };
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Permission state as stored in `sys.database_permissions.state`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionState {
    #[default]
    #[serde(rename = "G")]
    Grant,
    #[serde(rename = "D")]
    Deny,
    #[serde(rename = "W")]
    GrantWithGrantOption,
}

impl PermissionState {
    pub fn code(&self) -> &'static str {
        match self {
            PermissionState::Grant => "G",
            PermissionState::Deny => "D",
            PermissionState::GrantWithGrantOption => "W",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PermissionState::Grant => "GRANT",
            PermissionState::Deny => "DENY",
            PermissionState::GrantWithGrantOption => "GRANT_WITH_GRANT_OPTION",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "G" => Ok(PermissionState::Grant),
            "D" => Ok(PermissionState::Deny),
            "W" => Ok(PermissionState::GrantWithGrantOption),
            other => Err(Error::invalid(format!("unknown permission state '{}'", other))),
        }
    }
}

/// Scope classification of a permission row
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionClass {
    #[default]
    Database,
    Object,
    Schema,
    Server,
    Other,
}

impl PermissionClass {
    /// Map the numeric `class` column of `sys.database_permissions` / `sys.server_permissions`
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => PermissionClass::Database,
            1 => PermissionClass::Object,
            3 => PermissionClass::Schema,
            100 => PermissionClass::Server,
            _ => PermissionClass::Other,
        }
    }
}

impl std::fmt::Display for PermissionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionClass::Database => write!(f, "DATABASE"),
            PermissionClass::Object => write!(f, "OBJECT"),
            PermissionClass::Schema => write!(f, "SCHEMA"),
            PermissionClass::Server => write!(f, "SERVER"),
            PermissionClass::Other => write!(f, "OTHER"),
        }
    }
}

/// A permission row as reported by the backend
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    #[serde(default)]
    pub class: PermissionClass,
    #[serde(default)]
    pub class_desc: String,
    #[serde(default)]
    pub major_id: i64,
    #[serde(default)]
    pub minor_id: i64,
    #[serde(default)]
    pub grantee_principal_id: i64,
    #[serde(default)]
    pub grantor_principal_id: i64,
    #[serde(default)]
    pub permission_type: String,
    #[serde(default)]
    pub state: PermissionState,
    #[serde(default)]
    pub state_desc: String,
}

impl Permission {
    /// A desired permission carrying only name and state
    pub fn new(name: impl Into<String>, state: PermissionState) -> Self {
        Self {
            name: name.into(),
            state,
            state_desc: state.description().to_string(),
            ..Default::default()
        }
    }

    pub fn grant(&self) -> PermissionGrant {
        PermissionGrant {
            name: self.name.to_uppercase(),
            state: self.state,
        }
    }
}

/// Desired-state view of a permission: name plus state
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub name: String,
    #[serde(default)]
    pub state: PermissionState,
}

impl PermissionGrant {
    pub fn new(name: impl Into<String>, state: PermissionState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// Identity used for set comparison: names are case-insensitive
    pub fn key(&self) -> (String, PermissionState) {
        (self.name.to_uppercase(), self.state)
    }

    pub fn to_permission(&self) -> Permission {
        Permission::new(self.name.clone(), self.state)
    }
}

/// A permission qualified by the schema it applies to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaPermission {
    pub schema_name: String,
    #[serde(flatten)]
    pub permission: Permission,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_passwords() {
        let login = Login {
            name: "svc_app".into(),
            password: Some("Hunter2!Secret".into()),
            ..Default::default()
        };
        let user = User {
            name: "alice".into(),
            contained: true,
            password: Some("Hunter2!Secret".into()),
            ..Default::default()
        };
        let update = UserUpdate {
            password: Some("Hunter2!Secret".into()),
            ..Default::default()
        };
        for rendered in [format!("{:?}", login), format!("{:?}", user), format!("{:?}", update)] {
            assert!(!rendered.contains("Hunter2!Secret"), "{}", rendered);
            assert!(rendered.contains("<redacted>"));
        }
        assert!(format!("{:?}", Login::default()).contains("password: None"));
    }

    fn contained(password: Option<&str>, external: bool) -> User {
        User {
            name: "alice".into(),
            contained: true,
            external,
            password: password.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_contained_user_password_xor_external() {
        assert!(contained(Some("P@ssw0rd!"), false).validate_variant().is_ok());
        assert!(contained(None, true).validate_variant().is_ok());
        assert!(contained(None, false).validate_variant().is_err());
        assert!(contained(Some("P@ssw0rd!"), true).validate_variant().is_err());
    }

    #[test]
    fn test_login_mapped_user_rules() {
        let mut user = User {
            name: "bob".into(),
            login_name: Some("bob".into()),
            ..Default::default()
        };
        assert!(user.validate_variant().is_ok());

        user.default_language = "us_english".into();
        assert!(matches!(user.validate_variant(), Err(Error::InvalidInput(_))));

        user.default_language.clear();
        user.login_name = None;
        assert!(user.validate_variant().is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let login = Login {
            name: "svc".into(),
            password: Some("secret".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&login).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_permission_state_codes() {
        assert_eq!(PermissionState::from_code("D ").unwrap(), PermissionState::Deny);
        assert_eq!(PermissionState::Grant.description(), "GRANT");
        assert!(PermissionState::from_code("R").is_err());
        let json = serde_json::to_string(&PermissionGrant::new("SELECT", PermissionState::Deny)).unwrap();
        assert_eq!(json, r#"{"name":"SELECT","state":"D"}"#);
    }

    #[test]
    fn test_fixed_roles() {
        assert!(is_fixed_role_name(RoleScope::Database, "DB_OWNER"));
        assert!(is_fixed_role_name(RoleScope::Server, "sysadmin"));
        assert!(!is_fixed_role_name(RoleScope::Database, "app_readers"));
    }
}
