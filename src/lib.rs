use thiserror::Error;

/// Custom resources read by the sessions and the watcher
pub mod resources;

/// Database engines supported by KuberLogic and their operator conventions
pub mod engine;

/// Per-request sessions against a managed database cluster
pub mod session;

/// Runtime configuration
pub mod config;

/// Replication watcher controller
pub mod watcher;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

pub use engine::Engine;
pub use session::{Credentials, ServiceDescriptor, Session, Topology};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("unsupported database engine `{0}`")]
    UnsupportedEngine(String),

    #[error("topology of `{service}` is not resolved yet: {reason}")]
    TopologyUnresolved { service: String, reason: String },

    #[error("credentials unavailable: field `{field}` of secret `{secret}`")]
    CredentialUnavailable { secret: String, field: String },

    #[error("{kind} `{name}` is protected")]
    ProtectedResource { kind: &'static str, name: String },

    #[error("failed to {operation} `{target}`: {source}")]
    SqlError {
        operation: &'static str,
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("timed out trying to {operation} `{target}`")]
    Timeout {
        operation: &'static str,
        target: String,
    },

    #[error("IllegalService `{0}`: {1}")]
    IllegalService(String, String),

    #[error("IllegalConfig `{0}`: {1}")]
    IllegalConfig(String, String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of a failed SQL operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    /// The server could not be reached or refused the credentials
    Connection,
    /// The database or user already exists
    AlreadyExists,
    /// The database or user does not exist
    NotFound,
    Other,
}

impl Error {
    pub fn metric_label(&self) -> String {
        let name = format!("{self:?}");
        let end = name.find(|c: char| !c.is_alphanumeric()).unwrap_or(name.len());
        name[..end].to_lowercase()
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TopologyUnresolved { .. } | Error::Timeout { .. } => true,
            Error::SqlError { .. } => self.sql_kind() == Some(SqlErrorKind::Connection),
            Error::KubeError(e) => match e {
                kube::Error::Api(response) => response.code >= 500 || response.code == 429,
                kube::Error::HyperError(_)
                | kube::Error::Service(_)
                | kube::Error::ReadEvents(_) => true,
                _ => false,
            },
            _ => false,
        }
    }

    /// Classify a SQL failure without matching on driver messages
    pub fn sql_kind(&self) -> Option<SqlErrorKind> {
        let Error::SqlError {
            operation, source, ..
        } = self
        else {
            return None;
        };

        let kind = match source {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => SqlErrorKind::Connection,
            sqlx::Error::Database(db) => {
                if let Some(mysql) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    classify_mysql(mysql.number(), operation)
                } else {
                    classify_sqlstate(db.code().as_deref().unwrap_or_default())
                }
            }
            _ => SqlErrorKind::Other,
        };

        Some(kind)
    }
}

fn classify_sqlstate(code: &str) -> SqlErrorKind {
    match code {
        // duplicate_database, duplicate_object
        "42P04" | "42710" => SqlErrorKind::AlreadyExists,
        // invalid_catalog_name, undefined_object
        "3D000" | "42704" => SqlErrorKind::NotFound,
        // invalid_password, invalid_authorization_specification
        "28P01" | "28000" => SqlErrorKind::Connection,
        _ => SqlErrorKind::Other,
    }
}

fn classify_mysql(number: u16, operation: &str) -> SqlErrorKind {
    match number {
        // ER_DB_CREATE_EXISTS
        1007 => SqlErrorKind::AlreadyExists,
        // ER_DB_DROP_EXISTS, ER_BAD_DB_ERROR
        1008 | 1049 => SqlErrorKind::NotFound,
        // ER_ACCESS_DENIED_ERROR
        1045 => SqlErrorKind::Connection,
        // ER_CANNOT_USER covers both duplicate and missing accounts
        1396 if operation.starts_with("create") => SqlErrorKind::AlreadyExists,
        1396 => SqlErrorKind::NotFound,
        _ => SqlErrorKind::Other,
    }
}
