use async_trait::async_trait;
use sqlx::{mysql::MySqlConnectOptions, Connection, Executor, MySqlConnection};

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
        Engine::MySql.is_protected_database(name)
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
        let query = "SELECT CONVERT(schema_name USING utf8mb4) FROM information_schema.schemata";
        self.session
            .run("list databases", "schemata", fetch_names(admin(self.session), query))
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
        Engine::MySql.is_protected_user(name)
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
        let statements = vec![format!("DROP USER {}", account(name))];
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
        // The same user may exist for several hosts
        let query = "SELECT DISTINCT CONVERT(user USING utf8mb4) FROM mysql.user";
        self.session
            .run("list users", "mysql.user", fetch_names(admin(self.session), query))
            .await
    }
}

pub(super) async fn create_table(session: &Session, table: &str) -> Result<()> {
    let options = session.mysql_options(session.master_endpoint(), session.database_name());
    let statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (id BIGINT AUTO_INCREMENT PRIMARY KEY)",
        quote_identifier(table)
    )];

    session.run("create table", table, execute(options, statements)).await
}

pub(super) async fn write_record(session: &Session, endpoint: &str, table: &str) -> Result<i64> {
    let options = session.mysql_options(endpoint, session.database_name());
    let statement = format!("INSERT INTO {} VALUES ()", quote_identifier(table));

    session
        .run("write record", table, async move {
            let mut conn = MySqlConnection::connect_with(&options).await?;
            let id = conn.execute(statement.as_str()).await?.last_insert_id();
            conn.close().await?;

            i64::try_from(id).map_err(|e| sqlx::Error::Decode(Box::new(e)))
        })
        .await
}

pub(super) async fn read_last_record(
    session: &Session,
    endpoint: &str,
    table: &str,
) -> Result<Option<i64>> {
    let options = session.mysql_options(endpoint, session.database_name());
    let query = format!(
        "SELECT id FROM {} ORDER BY id DESC LIMIT 1",
        quote_identifier(table)
    );

    session
        .run("read record", table, async move {
            let mut conn = MySqlConnection::connect_with(&options).await?;
            let id = sqlx::query_scalar::<_, i64>(&query)
                .fetch_optional(&mut conn)
                .await?;
            conn.close().await?;
            Ok(id)
        })
        .await
}

fn admin(session: &Session) -> MySqlConnectOptions {
    session.mysql_options(session.master_endpoint(), "")
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', r"\\").replace('\'', "''"))
}

/// Account of a user, scoped to local connections
fn account(name: &str) -> String {
    format!("{}@'localhost'", quote_literal(name))
}

fn create_user_statements(name: &str, password: &str) -> Vec<String> {
    let account = account(name);
    vec![
        format!("CREATE USER {account} IDENTIFIED BY {}", quote_literal(password)),
        format!("GRANT ALL PRIVILEGES ON *.* TO {account}"),
        "FLUSH PRIVILEGES".to_string(),
    ]
}

fn edit_user_statements(name: &str, password: &str) -> Vec<String> {
    vec![
        format!(
            "ALTER USER {} IDENTIFIED BY {}",
            account(name),
            quote_literal(password)
        ),
        "FLUSH PRIVILEGES".to_string(),
    ]
}

/// Run statements one at a time; the server rejects multi-statement queries
async fn execute(options: MySqlConnectOptions, statements: Vec<String>) -> Result<(), sqlx::Error> {
    let mut conn = MySqlConnection::connect_with(&options).await?;
    for statement in &statements {
        conn.execute(statement.as_str()).await?;
    }
    conn.close().await
}

async fn fetch_names(options: MySqlConnectOptions, query: &str) -> Result<Vec<String>, sqlx::Error> {
    let mut conn = MySqlConnection::connect_with(&options).await?;
    let mut names = sqlx::query_scalar::<_, String>(query)
        .fetch_all(&mut conn)
        .await?;
    conn.close().await?;

    names.sort();
    names.dedup();
    Ok(names)
}
