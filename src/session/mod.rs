use std::{fmt::Display, future::Future};

use kube::{Client, ResourceExt as _};
use tracing::{info, instrument, Instrument as _, Span};

use crate::{config::SessionConfig, resources::KuberLogicService, Engine, Error, Result};

mod connection;
mod credentials;
mod manager;
mod mysql;
mod postgres;
mod topology;

pub use credentials::{Credentials, SecretRef};
pub use manager::{DatabaseManager, Databases, UserManager, Users};
pub use topology::{PodSelectors, Topology};

/// Identity of a managed database cluster, as declared by its custom resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub engine: Engine,
    pub namespace: String,
    pub name: String,
    pub replicas: u32,
}

impl ServiceDescriptor {
    pub fn new(
        engine: Engine,
        namespace: impl Into<String>,
        name: impl Into<String>,
        replicas: u32,
    ) -> Self {
        Self {
            engine,
            namespace: namespace.into(),
            name: name.into(),
            replicas,
        }
    }

    /// Name of the operator-managed cluster
    pub fn cluster_name(&self) -> String {
        self.engine.cluster_name(&self.name)
    }
}

impl Display for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl TryFrom<&KuberLogicService> for ServiceDescriptor {
    type Error = Error;

    fn try_from(service: &KuberLogicService) -> Result<Self> {
        let name = service.name_any();
        let namespace = service
            .namespace()
            .ok_or_else(|| Error::IllegalService(name.clone(), "missing namespace".into()))?;
        let replicas = u32::try_from(service.spec.replicas)
            .map_err(|_| Error::IllegalService(name.clone(), "negative replica count".into()))?;

        Ok(Self {
            engine: service.spec.type_.parse()?,
            namespace,
            name,
            replicas,
        })
    }
}

/// A short-lived handle on one managed database cluster.
///
/// A session is built for a single request: topology and credentials are resolved
/// from Kubernetes when it is created and never refreshed. Every SQL operation opens
/// its own connection to the master and closes it before returning.
#[derive(Clone)]
pub struct Session {
    client: Client,
    descriptor: ServiceDescriptor,
    topology: Topology,
    credentials: Credentials,
    database: String,
    config: SessionConfig,
    span: Span,
}

impl Session {
    /// Resolve the topology and credentials of a service.
    ///
    /// An empty `database` targets the engine's administrative database.
    #[instrument(skip(client, descriptor, config), fields(service = %descriptor, engine = %descriptor.engine))]
    pub async fn new(
        client: Client,
        descriptor: ServiceDescriptor,
        database: &str,
        config: SessionConfig,
    ) -> Result<Self> {
        let topology = Topology::resolve(&client, &descriptor, &config).await?;
        let credentials = Credentials::resolve(&client, &descriptor).await?;

        Ok(Self::from_parts(
            client,
            descriptor,
            topology,
            credentials,
            database,
            config,
        ))
    }

    /// Assemble a session from already resolved parts.
    pub fn from_parts(
        client: Client,
        descriptor: ServiceDescriptor,
        topology: Topology,
        credentials: Credentials,
        database: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        let database = database.into();
        let span = tracing::info_span!(
            "session",
            service = %descriptor,
            engine = %descriptor.engine,
            database = %database,
        );

        Self {
            client,
            descriptor,
            topology,
            credentials,
            database,
            config,
            span,
        }
    }

    pub fn engine(&self) -> Engine {
        self.descriptor.engine
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Target database; empty for administrative sessions
    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn master_endpoint(&self) -> &str {
        &self.topology.master_endpoint
    }

    pub fn replica_endpoints(&self) -> &[String] {
        &self.topology.replica_endpoints
    }

    pub fn access_port(&self) -> u16 {
        self.topology.access_port
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Database manager of the session's engine
    pub fn database(&self) -> Databases<'_> {
        match self.engine() {
            Engine::PostgreSql => Databases::PostgreSql(postgres::Databases::new(self)),
            Engine::MySql => Databases::MySql(mysql::Databases::new(self)),
        }
    }

    /// User manager of the session's engine
    pub fn user(&self) -> Users<'_> {
        match self.engine() {
            Engine::PostgreSql => Users::PostgreSql(postgres::Users::new(self)),
            Engine::MySql => Users::MySql(mysql::Users::new(self)),
        }
    }

    /// Run one SQL operation under the session's span and deadline
    pub(crate) async fn run<T, Fut>(
        &self,
        operation: &'static str,
        target: &str,
        work: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let work = work.instrument(self.span.clone());
        match tokio::time::timeout(self.config.sql_timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(Error::SqlError {
                operation,
                target: target.to_string(),
                source,
            }),
            Err(_) => Err(Error::Timeout {
                operation,
                target: target.to_string(),
            }),
        }
    }
}

/// Operations exposed to request handlers.
///
/// These enforce the protected-resource policy before any SQL is sent, which the
/// managers themselves leave to their callers.
impl Session {
    pub async fn create_database(&self, name: &str) -> Result<()> {
        let databases = self.database();
        ensure_unprotected("database", name, databases.is_protected(name))?;

        databases.create(name).await?;
        info!(parent: &self.span, database = name, "created database");
        Ok(())
    }

    pub async fn drop_database(&self, name: &str) -> Result<()> {
        let databases = self.database();
        ensure_unprotected("database", name, databases.is_protected(name))?;

        databases.drop(name).await?;
        info!(parent: &self.span, database = name, "dropped database");
        Ok(())
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.database().list().await
    }

    pub async fn create_user(&self, name: &str, password: &str) -> Result<()> {
        let users = self.user();
        ensure_unprotected("user", name, users.is_protected(name) || self.is_admin(name))?;

        users.create(name, password).await?;
        info!(parent: &self.span, user = name, "created user");
        Ok(())
    }

    pub async fn delete_user(&self, name: &str) -> Result<()> {
        let users = self.user();
        ensure_unprotected("user", name, users.is_protected(name) || self.is_admin(name))?;

        users.delete(name).await?;
        info!(parent: &self.span, user = name, "deleted user");
        Ok(())
    }

    /// Change a user's password.
    ///
    /// Editing the administrative user also rewrites the credentials secret. This
    /// session keeps the old password; build a new one to use the new password.
    pub async fn edit_user(&self, name: &str, password: &str) -> Result<()> {
        let users = self.user();
        ensure_unprotected("user", name, users.is_protected(name))?;

        let edited = users.edit(name, password).await;
        self.finish_edit(name, password, edited).await
    }

    /// Publish a password change once the server has accepted it
    async fn finish_edit(&self, name: &str, password: &str, edited: Result<()>) -> Result<()> {
        edited?;
        if self.is_admin(name) {
            self.set_credentials(password).await?;
        }
        info!(parent: &self.span, user = name, "edited user");
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<String>> {
        self.user().list().await
    }

    /// Store a new administrative password in the credentials secret.
    ///
    /// The session keeps using the password it was built with.
    pub async fn set_credentials(&self, password: &str) -> Result<()> {
        self.credentials
            .store(&self.client, &self.descriptor.namespace, password)
            .await
    }

    fn is_admin(&self, name: &str) -> bool {
        name == self.credentials.username
    }
}

/// Probes used to verify replication
impl Session {
    /// Create the probe table in the session's database unless it already exists
    pub async fn create_table(&self, table: &str) -> Result<()> {
        match self.engine() {
            Engine::PostgreSql => postgres::create_table(self, table).await,
            Engine::MySql => mysql::create_table(self, table).await,
        }
    }

    /// Insert a row into the probe table on `endpoint`, returning its id
    pub async fn write_record(&self, endpoint: &str, table: &str) -> Result<i64> {
        match self.engine() {
            Engine::PostgreSql => postgres::write_record(self, endpoint, table).await,
            Engine::MySql => mysql::write_record(self, endpoint, table).await,
        }
    }

    /// Read the highest id of the probe table on `endpoint`
    pub async fn read_last_record(&self, endpoint: &str, table: &str) -> Result<Option<i64>> {
        match self.engine() {
            Engine::PostgreSql => postgres::read_last_record(self, endpoint, table).await,
            Engine::MySql => mysql::read_last_record(self, endpoint, table).await,
        }
    }
}

fn ensure_unprotected(kind: &'static str, name: &str, protected: bool) -> Result<()> {
    if protected {
        Err(Error::ProtectedResource {
            kind,
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
