//! Round trips against live database servers.
//!
//! Run with `cargo test -- --ignored` after pointing `KUBERLOGIC_TEST_POSTGRES_*` and
//! `KUBERLOGIC_TEST_MYSQL_*` at disposable servers; the administrative user must be
//! allowed to create databases and users.
use std::env;

use hyper::Body;
use kube::Client;
use secrecy::SecretString;

use kuberlogic_session::{
    config::SessionConfig,
    session::{PodSelectors, SecretRef},
    Credentials, Engine, Error, ServiceDescriptor, Session, SqlErrorKind, Topology,
};

fn var(engine: Engine, name: &str, default: &str) -> String {
    let key = format!(
        "KUBERLOGIC_TEST_{}_{name}",
        engine.to_string().to_uppercase()
    );
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// A session on a server reachable without Kubernetes
fn session(engine: Engine, username: &str, password: &str, database: &str) -> Session {
    // Nothing in these tests talks to the API server
    let client = kube_client();

    let host = var(engine, "HOST", "127.0.0.1");
    let port = var(engine, "PORT", &engine.default_port().to_string())
        .parse()
        .unwrap();
    let descriptor = ServiceDescriptor::new(engine, "default", "it", 0);
    let topology = Topology {
        master_endpoint: host,
        replica_endpoints: vec![],
        access_port: port,
        replica_port: port,
        pod_selectors: PodSelectors {
            master: engine.master_selector("it"),
            replica: engine.replica_selector("it"),
        },
    };
    let credentials = Credentials::new(
        username,
        SecretRef {
            name: "it-credentials".into(),
            field: "password".into(),
        },
        SecretString::new(password.into()),
    );

    Session::from_parts(
        client,
        descriptor,
        topology,
        credentials,
        database,
        SessionConfig::default(),
    )
}

fn admin_session(engine: Engine, database: &str) -> Session {
    let (user, password) = match engine {
        Engine::PostgreSql => ("postgres", "postgres"),
        Engine::MySql => ("root", "root"),
    };
    session(
        engine,
        &var(engine, "USER", user),
        &var(engine, "PASSWORD", password),
        database,
    )
}

fn unique_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..12])
}

async fn database_round_trip(engine: Engine) {
    let session = admin_session(engine, "");
    let name = unique_name("kl_db");

    session.create_database(&name).await.unwrap();
    assert!(session.list_databases().await.unwrap().contains(&name));

    let err = session.create_database(&name).await.unwrap_err();
    assert_eq!(err.sql_kind(), Some(SqlErrorKind::AlreadyExists), "{err}");

    session.drop_database(&name).await.unwrap();
    assert!(!session.list_databases().await.unwrap().contains(&name));

    let err = session.drop_database(&name).await.unwrap_err();
    assert_eq!(err.sql_kind(), Some(SqlErrorKind::NotFound), "{err}");
}

async fn user_round_trip(engine: Engine) {
    let session = admin_session(engine, "");
    let name = unique_name("kl_user");

    session.create_user(&name, "first-pw").await.unwrap();
    assert!(session.list_users().await.unwrap().contains(&name));

    let err = session.create_user(&name, "first-pw").await.unwrap_err();
    assert_eq!(err.sql_kind(), Some(SqlErrorKind::AlreadyExists), "{err}");

    session.edit_user(&name, "second-pw").await.unwrap();

    // MySQL accounts are bound to local connections, which a test client is not
    if engine == Engine::PostgreSql {
        let fresh = session_as(engine, &name, "second-pw");
        fresh.list_databases().await.unwrap();

        let stale = session_as(engine, &name, "first-pw");
        let err = stale.list_databases().await.unwrap_err();
        assert_eq!(err.sql_kind(), Some(SqlErrorKind::Connection), "{err}");
    }

    session.delete_user(&name).await.unwrap();
    assert!(!session.list_users().await.unwrap().contains(&name));
}

fn session_as(engine: Engine, user: &str, password: &str) -> Session {
    session(engine, user, password, "")
}

async fn probe_round_trip(engine: Engine) {
    let admin = admin_session(engine, "");
    let database = unique_name("kl_probe");
    admin.create_database(&database).await.unwrap();

    let session = admin_session(engine, &database);
    session.create_table("kuberlogic_probe").await.unwrap();
    session.create_table("kuberlogic_probe").await.unwrap();

    let master = session.master_endpoint().to_string();
    assert_eq!(
        session.read_last_record(&master, "kuberlogic_probe").await.unwrap(),
        None
    );
    let first = session.write_record(&master, "kuberlogic_probe").await.unwrap();
    let second = session.write_record(&master, "kuberlogic_probe").await.unwrap();
    assert!(second > first);
    assert_eq!(
        session.read_last_record(&master, "kuberlogic_probe").await.unwrap(),
        Some(second)
    );

    admin.drop_database(&database).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn postgres_databases() {
    database_round_trip(Engine::PostgreSql).await;
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn postgres_users() {
    user_round_trip(Engine::PostgreSql).await;
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn postgres_probe() {
    probe_round_trip(Engine::PostgreSql).await;
}

#[tokio::test]
#[ignore = "requires a MySQL server"]
async fn mysql_databases() {
    database_round_trip(Engine::MySql).await;
}

#[tokio::test]
#[ignore = "requires a MySQL server"]
async fn mysql_users() {
    user_round_trip(Engine::MySql).await;
}

#[tokio::test]
#[ignore = "requires a MySQL server"]
async fn mysql_probe() {
    probe_round_trip(Engine::MySql).await;
}

#[tokio::test]
async fn unreachable_servers_fail_as_connection_errors() {
    let base = admin_session(Engine::PostgreSql, "");
    // Nothing listens on port 1
    let session = Session::from_parts(
        kube_client(),
        base.descriptor().clone(),
        Topology {
            access_port: 1,
            master_endpoint: "127.0.0.1".into(),
            ..base.topology().clone()
        },
        base.credentials().clone(),
        "",
        SessionConfig::default(),
    );

    let err = session.list_databases().await.unwrap_err();
    assert!(
        matches!(err, Error::SqlError { operation: "list databases", .. }),
        "{err}"
    );
    assert_eq!(err.sql_kind(), Some(SqlErrorKind::Connection));
    assert!(err.is_transient());
}

fn kube_client() -> Client {
    let (mock_service, _handle) =
        tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
    Client::new(mock_service, "default")
}
