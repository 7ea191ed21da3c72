use async_trait::async_trait;
use pg_escape::{quote_identifier, quote_literal};
use sqlx::{postgres::PgConnectOptions, Connection, Executor, PgConnection};

use crate::{Engine, Result};

use super::{DatabaseManager, Session, UserManager};

pub struct Databases<'a> {
    session: &'a Session,
}

impl<'a> Databases<'a> {
    pub(crate) fn new(session: &'a Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl DatabaseManager for Databases<'_> {
    fn is_protected(&self, name: &str) -> bool {
        Engine::PostgreSql.is_protected_database(name)
    }

    async fn create(&self, name: &str) -> Result<()> {
        let statements = vec![format!("CREATE DATABASE {}", quote_identifier(name))];
        self.session
            .run("create database", name, execute(admin(self.session), statements))
            .await
    }

    async fn drop(&self, name: &str) -> Result<()> {
        let statements = vec![format!("DROP DATABASE {}", quote_identifier(name))];
        self.session
            .run("drop database", name, execute(admin(self.session), statements))
            .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let query = "SELECT datname::text FROM pg_database WHERE datistemplate = false";
        self.session
            .run("list databases", "pg_database", fetch_names(admin(self.session), query))
            .await
    }
}

pub struct Users<'a> {
    session: &'a Session,
}

impl<'a> Users<'a> {
    pub(crate) fn new(session: &'a Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl UserManager for Users<'_> {
    fn is_protected(&self, name: &str) -> bool {
        Engine::PostgreSql.is_protected_user(name)
    }

    async fn create(&self, name: &str, password: &str) -> Result<()> {
        self.session
            .run(
                "create user",
                name,
                execute(admin(self.session), create_user_statements(name, password)),
            )
            .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let statements = vec![format!("DROP USER {}", quote_identifier(name))];
        self.session
            .run("delete user", name, execute(admin(self.session), statements))
            .await
    }

    async fn edit(&self, name: &str, password: &str) -> Result<()> {
        self.session
            .run(
                "edit user",
                name,
                execute(admin(self.session), edit_user_statements(name, password)),
            )
            .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let query = "SELECT usename::text FROM pg_catalog.pg_user";
        self.session
            .run("list users", "pg_user", fetch_names(admin(self.session), query))
            .await
    }
}

pub(super) async fn create_table(session: &Session, table: &str) -> Result<()> {
    let options = session.pg_options(session.master_endpoint(), session.database_name());
    let statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (id bigserial PRIMARY KEY)",
        quote_identifier(table)
    )];

    session.run("create table", table, execute(options, statements)).await
}

pub(super) async fn write_record(session: &Session, endpoint: &str, table: &str) -> Result<i64> {
    let options = session.pg_options(endpoint, session.database_name());
    let query = format!(
        "INSERT INTO {} DEFAULT VALUES RETURNING id",
        quote_identifier(table)
    );

    session
        .run("write record", table, async move {
            let mut conn = PgConnection::connect_with(&options).await?;
            let id = sqlx::query_scalar::<_, i64>(&query)
                .fetch_one(&mut conn)
                .await?;
            conn.close().await?;
            Ok(id)
        })
        .await
}

pub(super) async fn read_last_record(
    session: &Session,
    endpoint: &str,
    table: &str,
) -> Result<Option<i64>> {
    let options = session.pg_options(endpoint, session.database_name());
    let query = format!(
        "SELECT id FROM {} ORDER BY id DESC LIMIT 1",
        quote_identifier(table)
    );

    session
        .run("read record", table, async move {
            let mut conn = PgConnection::connect_with(&options).await?;
            let id = sqlx::query_scalar::<_, i64>(&query)
                .fetch_optional(&mut conn)
                .await?;
            conn.close().await?;
            Ok(id)
        })
        .await
}

/// Options for the administrative database on the master
fn admin(session: &Session) -> PgConnectOptions {
    session.pg_options(session.master_endpoint(), "")
}

fn create_user_statements(name: &str, password: &str) -> Vec<String> {
    let user = quote_identifier(name);
    vec![
        format!(
            "CREATE USER {user} WITH ENCRYPTED PASSWORD {}",
            quote_literal(password)
        ),
        format!("ALTER USER {user} WITH SUPERUSER"),
    ]
}

fn edit_user_statements(name: &str, password: &str) -> Vec<String> {
    vec![format!(
        "ALTER USER {} WITH PASSWORD {}",
        quote_identifier(name),
        quote_literal(password)
    )]
}

/// Run statements one at a time on a single connection
async fn execute(options: PgConnectOptions, statements: Vec<String>) -> Result<(), sqlx::Error> {
    let mut conn = PgConnection::connect_with(&options).await?;
    for statement in &statements {
        conn.execute(statement.as_str()).await?;
    }
    conn.close().await
}

async fn fetch_names(options: PgConnectOptions, query: &str) -> Result<Vec<String>, sqlx::Error> {
    let mut conn = PgConnection::connect_with(&options).await?;
    let mut names = sqlx::query_scalar::<_, String>(query)
        .fetch_all(&mut conn)
        .await?;
    conn.close().await?;

    names.sort();
    Ok(names)
}
