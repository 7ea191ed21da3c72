use std::borrow::Cow;

use sqlx::{mysql::MySqlConnectOptions, postgres::PgConnectOptions};

use crate::Engine;

use super::Session;

impl Session {
    /// Format a driver-specific DSN for the given endpoint and database.
    ///
    /// PostgreSQL uses the libpq key/value form, MySQL the `user:password@tcp(host:port)/db`
    /// form. An empty database selects the engine's administrative database.
    pub fn connection_string(&self, endpoint: &str, database: &str) -> String {
        let credentials = self.credentials();
        let port = self.port_of(endpoint);
        let database = self.database_or_admin(database);

        match self.engine() {
            Engine::PostgreSql => format!(
                "host={} port={port} user={} password={} dbname={}",
                libpq_value(endpoint),
                libpq_value(&credentials.username),
                libpq_value(credentials.password()),
                libpq_value(database),
            ),
            Engine::MySql => format!(
                "{}:{}@tcp({endpoint}:{port})/{database}",
                credentials.username,
                credentials.password(),
            ),
        }
    }

    /// Replicas are reached on their pods, everything else through the master service
    pub(crate) fn port_of(&self, endpoint: &str) -> u16 {
        let topology = self.topology();
        if topology.replica_endpoints.iter().any(|e| e == endpoint) {
            topology.replica_port
        } else {
            topology.access_port
        }
    }

    pub(crate) fn database_or_admin<'a>(&self, database: &'a str) -> &'a str {
        if database.is_empty() {
            self.engine().admin_database()
        } else {
            database
        }
    }

    pub(crate) fn pg_options(&self, endpoint: &str, database: &str) -> PgConnectOptions {
        let credentials = self.credentials();

        PgConnectOptions::new_without_pgpass()
            .host(endpoint)
            .port(self.port_of(endpoint))
            .username(&credentials.username)
            .password(credentials.password())
            .database(self.database_or_admin(database))
    }

    pub(crate) fn mysql_options(&self, endpoint: &str, database: &str) -> MySqlConnectOptions {
        let credentials = self.credentials();
        let options = MySqlConnectOptions::new()
            .host(endpoint)
            .port(self.port_of(endpoint))
            .username(&credentials.username)
            .password(credentials.password());

        match self.database_or_admin(database) {
            "" => options,
            database => options.database(database),
        }
    }
}

/// Quote a libpq connection string value when it would not survive as a bare word
fn libpq_value(value: &str) -> Cow<'_, str> {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');

    if bare {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!(
            "'{}'",
            value.replace('\\', r"\\").replace('\'', r"\'")
        ))
    }
}
