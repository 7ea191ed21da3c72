use async_trait::async_trait;

use crate::Result;

use super::{mysql, postgres};

/// Database DDL against the master of a cluster.
///
/// Implementations do not check [`DatabaseManager::is_protected`] themselves; callers
/// must, see the guarded operations on [`super::Session`].
#[async_trait]
pub trait DatabaseManager: Send + Sync {
    /// Whether `name` is a system database that must never be mutated
    fn is_protected(&self, name: &str) -> bool;

    async fn create(&self, name: &str) -> Result<()>;

    async fn drop(&self, name: &str) -> Result<()>;

    /// All non-template databases, protected ones included
    async fn list(&self) -> Result<Vec<String>>;
}

/// User DDL against the master of a cluster.
#[async_trait]
pub trait UserManager: Send + Sync {
    /// Whether `name` is a system user that must never be mutated
    fn is_protected(&self, name: &str) -> bool;

    /// Create a user with full privileges
    async fn create(&self, name: &str, password: &str) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Change the password of a user
    async fn edit(&self, name: &str, password: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<String>>;
}

/// Database manager of one of the supported engines
pub enum Databases<'a> {
    PostgreSql(postgres::Databases<'a>),
    MySql(mysql::Databases<'a>),
}

/// User manager of one of the supported engines
pub enum Users<'a> {
    PostgreSql(postgres::Users<'a>),
    MySql(mysql::Users<'a>),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            Self::PostgreSql($inner) => $call,
            Self::MySql($inner) => $call,
        }
    };
}

#[async_trait]
impl DatabaseManager for Databases<'_> {
    fn is_protected(&self, name: &str) -> bool {
        dispatch!(self, m => m.is_protected(name))
    }

    async fn create(&self, name: &str) -> Result<()> {
        dispatch!(self, m => m.create(name).await)
    }

    async fn drop(&self, name: &str) -> Result<()> {
        dispatch!(self, m => m.drop(name).await)
    }

    async fn list(&self) -> Result<Vec<String>> {
        dispatch!(self, m => m.list().await)
    }
}

#[async_trait]
impl UserManager for Users<'_> {
    fn is_protected(&self, name: &str) -> bool {
        dispatch!(self, m => m.is_protected(name))
    }

    async fn create(&self, name: &str, password: &str) -> Result<()> {
        dispatch!(self, m => m.create(name, password).await)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        dispatch!(self, m => m.delete(name).await)
    }

    async fn edit(&self, name: &str, password: &str) -> Result<()> {
        dispatch!(self, m => m.edit(name, password).await)
    }

    async fn list(&self) -> Result<Vec<String>> {
        dispatch!(self, m => m.list().await)
    }
}
