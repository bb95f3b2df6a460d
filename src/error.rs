//! Error taxonomy and classification of driver failures
//!
//! Every repository call funnels driver errors through [`Error::from_driver`],
//! which prefers SQL Server error numbers over message text. Substring matching
//! is only used to recognise the `NotFound` sentinels this crate produces itself.

use serde::Serialize;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Which kind of object a `NotFound` refers to.
///
/// The `Display` form is the sentinel text embedded in `Error::NotFound`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NotFoundKind {
    Login,
    User,
    DatabaseRole,
    ServerRole,
    Permissions,
    /// A role member named in `ALTER ROLE`, whichever principal type it is
    Principal,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundKind::Login => write!(f, "login"),
            NotFoundKind::User => write!(f, "user"),
            NotFoundKind::DatabaseRole => write!(f, "database role"),
            NotFoundKind::ServerRole => write!(f, "server role"),
            NotFoundKind::Permissions => write!(f, "permissions"),
            NotFoundKind::Principal => write!(f, "principal"),
        }
    }
}

impl NotFoundKind {
    const ALL: [NotFoundKind; 6] = [
        NotFoundKind::Login,
        NotFoundKind::User,
        NotFoundKind::DatabaseRole,
        NotFoundKind::ServerRole,
        NotFoundKind::Permissions,
        NotFoundKind::Principal,
    ];

    /// The literal sentinel, e.g. `"database role not found"`
    pub fn sentinel(&self) -> String {
        format!("{} not found", self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("{0} not found")]
    NotFound(NotFoundKind),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unexpected error: {0:#}")]
    Unknown(anyhow::Error),
}

/// A rendered error, ready to be shown by the orchestrator
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub summary: String,
    pub detail: String,
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn unknown(msg: impl std::fmt::Display) -> Self {
        Error::Unknown(anyhow::anyhow!("{}", msg))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_not_found_of(&self, kind: NotFoundKind) -> bool {
        matches!(self, Error::NotFound(k) if *k == kind)
    }

    /// The member of a role statement does not exist
    pub fn is_missing_member(&self) -> bool {
        matches!(
            self,
            Error::NotFound(NotFoundKind::User | NotFoundKind::Login | NotFoundKind::Principal)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Short category line
    pub fn summary(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "Invalid input",
            Error::AuthFailed(_) => "Authentication failed",
            Error::NotFound(_) => "Object not found",
            Error::Conflict(_) => "Conflict",
            Error::Forbidden(_) => "Forbidden",
            Error::Transient(_) => "Transient failure",
            Error::Unknown(_) => "Unexpected error",
        }
    }

    /// The underlying message without the category prefix
    pub fn detail(&self) -> String {
        match self {
            Error::InvalidInput(m)
            | Error::AuthFailed(m)
            | Error::Conflict(m)
            | Error::Forbidden(m)
            | Error::Transient(m) => m.clone(),
            Error::NotFound(kind) => kind.sentinel(),
            Error::Unknown(e) => format!("{:#}", e),
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            summary: self.summary().to_string(),
            detail: self.detail(),
        }
    }

    /// Recognise one of this crate's own `NotFound` sentinels in a message.
    pub fn from_message(msg: &str) -> Self {
        let lower = msg.to_lowercase();
        for kind in NotFoundKind::ALL {
            if lower.contains(&kind.sentinel()) {
                return Error::NotFound(kind);
            }
        }
        Error::unknown(msg)
    }

    /// Classify an error returned by the tiberius driver.
    pub fn from_driver(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as Tds;
        match err {
            Tds::Server(token) => classify_server_error(token.code(), token.message()),
            Tds::Io { kind, message } => Error::Transient(format!("{:?}: {}", kind, message)),
            Tds::Routing { host, port } => {
                Error::Transient(format!("unexpected routing request to {}:{}", host, port))
            }
            other => Error::Unknown(anyhow::Error::new(other)),
        }
    }
}

// ---- vendor error numbers ----

const AUTH_FAILED: &[u32] = &[
    4060,  // cannot open database requested by the login
    18452, // login from untrusted domain
    18456, // login failed
    18470, // account disabled
    18486, // account locked out
    18487, // password expired
    18488, // password must be changed
    33155, // Azure AD token validation failed
    40532, // cannot open server requested by the login
];

const CONFLICT: &[u32] = &[
    2714,  // there is already an object named ... in the database
    15023, // user, group, or role already exists in the current database
    15025, // the server principal already exists
    15063, // the login already has an account under a different user name
    15138, // the database principal owns a schema
    15144, // the role has members
    15141, // the server principal owns one or more endpoints/roles
    15174, // login owns one or more databases
    15434, // could not drop login as the user is currently logged in
    3729,  // cannot drop, referenced by another object
];

const FORBIDDEN: &[u32] = &[
    229,   // permission denied on object
    262,   // CREATE permission denied
    300,   // permission was denied
    15150, // cannot alter/drop the special user
    15247, // no permission to perform this action
    15405, // cannot use the special principal
    15406, // cannot execute as the server principal
    4613,  // grantor does not have GRANT permission
    4627,  // cannot grant, deny, or revoke permissions to sa, dbo, ...
];

const INVALID_INPUT: &[u32] = &[
    102,   // incorrect syntax
    105,   // unclosed quotation mark
    156,   // incorrect syntax near keyword
    170,   // incorrect syntax (legacy)
    2760,  // specified schema name does not exist
    4630,  // permission name is not valid for the specified class
    15007, // not a valid login
    15114, // password validation failed: too short
    15115, // password validation failed: too long
    15116, // password validation failed: not complex enough
    15118, // password validation failed: complexity
    15401, // Windows NT user or group not found
    15600, // invalid parameter
    33130, // principal is not a valid Azure AD identity
    33134, // principal could not be resolved in Azure AD
    33233, // password users only valid in contained databases
    12824, // contained database authentication is disabled
];

const TRANSIENT: &[u32] = &[
    233,   // connection established but error during login
    1205,  // deadlock victim
    1222,  // lock request timeout
    4221,  // login to read-secondary failed
    10053, // transport-level error
    10054, // connection reset
    10060, // network timeout
    40143, // service encountered an error processing the request
    40197, // service error processing the request
    40501, // service busy
    40540, // service encountered an error
    40613, // database not currently available
    49918, // not enough resources
    49919, // too many create/update operations
    49920, // too many operations in progress
];

/// Classify a server-side error token by error number, falling back to the
/// message only for "does not exist" (15151), whose subject is in the text.
pub fn classify_server_error(code: u32, message: &str) -> Error {
    let detail = format!("mssql error {}: {}", code, message);
    if AUTH_FAILED.contains(&code) {
        return Error::AuthFailed(detail);
    }
    if CONFLICT.contains(&code) {
        return Error::Conflict(detail);
    }
    if FORBIDDEN.contains(&code) {
        return Error::Forbidden(detail);
    }
    if INVALID_INPUT.contains(&code) {
        return Error::InvalidInput(detail);
    }
    if TRANSIENT.contains(&code) {
        return Error::Transient(detail);
    }
    if code == 15151 {
        // "Cannot drop the login 'x', because it does not exist or you do not have permission."
        // Role membership statements name the member as "the principal".
        let lower = message.to_lowercase();
        let kind = if lower.contains("the principal") {
            Some(NotFoundKind::Principal)
        } else if lower.contains("the server role") {
            Some(NotFoundKind::ServerRole)
        } else if lower.contains("the role") {
            Some(NotFoundKind::DatabaseRole)
        } else if lower.contains("the login") {
            Some(NotFoundKind::Login)
        } else if lower.contains("the user") {
            Some(NotFoundKind::User)
        } else {
            None
        };
        return match kind {
            Some(kind) => Error::NotFound(kind),
            None => Error::InvalidInput(detail),
        };
    }
    Error::Unknown(anyhow::anyhow!(detail))
}
