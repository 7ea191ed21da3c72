use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Team prefix used by the postgres operator for cluster and user names
const POSTGRES_TEAM: &str = "kuberlogic";

lazy_static! {
    static ref POSTGRES_DATABASES: HashSet<&'static str> =
        HashSet::from(["postgres", "kuberlogic"]);
    static ref POSTGRES_USERS: HashSet<&'static str> = HashSet::from(["postgres", "standby"]);
    static ref MYSQL_DATABASES: HashSet<&'static str> = HashSet::from([
        "information_schema",
        "mysql",
        "performance_schema",
        "sys",
        "sys_operator",
    ]);
    static ref MYSQL_USERS: HashSet<&'static str> = HashSet::from([
        "orchestrator",
        "sys_operator",
        "sys_replication",
        "sys_exporter",
        "sys_heartbeat",
        "mysql.sys",
        "root",
        "kuberlogic",
    ]);
}

/// A database engine backed by a third-party Kubernetes operator.
///
/// Every piece of operator-specific knowledge (naming of services, secrets and pod
/// labels) lives here, so supporting a new engine means adding a variant and filling
/// in its arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Engine {
    /// PostgreSQL managed by the zalando postgres-operator
    #[serde(rename = "postgresql")]
    PostgreSql,

    /// MySQL managed by the bitpoke mysql-operator
    #[serde(rename = "mysql")]
    MySql,
}

impl Engine {
    pub const ALL: [Engine; 2] = [Engine::PostgreSql, Engine::MySql];

    /// Name of the operator-managed cluster backing a service
    pub fn cluster_name(&self, service: &str) -> String {
        match self {
            Engine::PostgreSql => format!("{POSTGRES_TEAM}-{service}"),
            Engine::MySql => service.to_string(),
        }
    }

    /// Name of the Kubernetes service routing to the master
    pub fn master_service(&self, cluster: &str) -> String {
        match self {
            Engine::PostgreSql => cluster.to_string(),
            Engine::MySql => format!("{cluster}-mysql-master"),
        }
    }

    /// Name of the Kubernetes service routing to the replicas
    pub fn replica_service(&self, cluster: &str) -> String {
        match self {
            Engine::PostgreSql => format!("{cluster}-repl"),
            Engine::MySql => format!("{cluster}-mysql-replicas"),
        }
    }

    pub fn master_selector(&self, cluster: &str) -> BTreeMap<String, String> {
        self.selector(cluster, "master")
    }

    pub fn replica_selector(&self, cluster: &str) -> BTreeMap<String, String> {
        self.selector(cluster, "replica")
    }

    fn selector(&self, cluster: &str, role: &str) -> BTreeMap<String, String> {
        match self {
            Engine::PostgreSql => BTreeMap::from([
                ("application".into(), "spilo".into()),
                ("cluster-name".into(), cluster.into()),
                ("spilo-role".into(), role.into()),
            ]),
            Engine::MySql => BTreeMap::from([
                ("mysql.presslabs.org/cluster".into(), cluster.into()),
                ("role".into(), role.into()),
            ]),
        }
    }

    /// Default wire-protocol port
    pub fn default_port(&self) -> u16 {
        match self {
            Engine::PostgreSql => 5432,
            Engine::MySql => 3306,
        }
    }

    /// Name of the service port the operators publish for the engine
    pub fn port_name(&self) -> &'static str {
        match self {
            Engine::PostgreSql => "postgresql",
            Engine::MySql => "mysql",
        }
    }

    /// Secret holding the administrative password, and the field to read
    pub fn credentials_secret(&self, cluster: &str) -> (String, &'static str) {
        match self {
            Engine::PostgreSql => (
                format!("{}.{cluster}.credentials", self.admin_user()),
                "password",
            ),
            Engine::MySql => (format!("{cluster}-cred"), "ROOT_PASSWORD"),
        }
    }

    /// Well-known administrative user
    pub fn admin_user(&self) -> &'static str {
        match self {
            Engine::PostgreSql => POSTGRES_TEAM,
            Engine::MySql => "root",
        }
    }

    /// Database used for administrative connections
    pub fn admin_database(&self) -> &'static str {
        match self {
            Engine::PostgreSql => "postgres",
            Engine::MySql => "",
        }
    }

    pub fn is_protected_database(&self, name: &str) -> bool {
        match self {
            Engine::PostgreSql => POSTGRES_DATABASES.contains(name),
            Engine::MySql => MYSQL_DATABASES.contains(name),
        }
    }

    pub fn is_protected_user(&self, name: &str) -> bool {
        match self {
            Engine::PostgreSql => POSTGRES_USERS.contains(name),
            Engine::MySql => MYSQL_USERS.contains(name),
        }
    }

    /// The fixed set of protected databases
    pub fn protected_databases(&self) -> Vec<&'static str> {
        let set: &HashSet<&'static str> = match self {
            Engine::PostgreSql => &POSTGRES_DATABASES,
            Engine::MySql => &MYSQL_DATABASES,
        };
        let mut names: Vec<_> = set.iter().copied().collect();
        names.sort_unstable();
        names
    }

    /// The fixed set of protected users
    pub fn protected_users(&self) -> Vec<&'static str> {
        let set: &HashSet<&'static str> = match self {
            Engine::PostgreSql => &POSTGRES_USERS,
            Engine::MySql => &MYSQL_USERS,
        };
        let mut names: Vec<_> = set.iter().copied().collect();
        names.sort_unstable();
        names
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(Engine::PostgreSql),
            "mysql" => Ok(Engine::MySql),
            other => Err(Error::UnsupportedEngine(other.to_string())),
        }
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::PostgreSql => write!(f, "postgresql"),
            Engine::MySql => write!(f, "mysql"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_supported_engines() {
        assert_eq!("postgresql".parse::<Engine>().unwrap(), Engine::PostgreSql);
        assert_eq!("mysql".parse::<Engine>().unwrap(), Engine::MySql);

        for engine in Engine::ALL {
            assert_eq!(engine.to_string().parse::<Engine>().unwrap(), engine);
        }
    }

    #[test]
    fn rejects_unsupported_engines() {
        let err = "redis".parse::<Engine>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedEngine(name) if name == "redis"));
    }

    #[test]
    fn protected_databases_are_exhaustive() {
        assert_eq!(
            Engine::PostgreSql.protected_databases(),
            vec!["kuberlogic", "postgres"]
        );
        assert_eq!(
            Engine::MySql.protected_databases(),
            vec![
                "information_schema",
                "mysql",
                "performance_schema",
                "sys",
                "sys_operator"
            ]
        );

        for engine in Engine::ALL {
            for name in engine.protected_databases() {
                assert!(engine.is_protected_database(name));
            }
            for name in ["app", "foo", "Postgres", "mysql2", ""] {
                assert!(!engine.is_protected_database(name), "{engine}: {name}");
            }
        }
    }

    #[test]
    fn protected_users_are_exhaustive() {
        assert_eq!(Engine::PostgreSql.protected_users(), vec!["postgres", "standby"]);
        assert!(Engine::MySql.is_protected_user("mysql.sys"));
        assert!(Engine::MySql.is_protected_user("root"));
        assert!(!Engine::MySql.is_protected_user("foo"));

        for engine in Engine::ALL {
            for name in engine.protected_users() {
                assert!(engine.is_protected_user(name));
            }
        }
    }

    #[test]
    fn operator_naming_conventions() {
        let pg = Engine::PostgreSql;
        let cluster = pg.cluster_name("demo");
        assert_eq!(cluster, "kuberlogic-demo");
        assert_eq!(pg.master_service(&cluster), "kuberlogic-demo");
        assert_eq!(pg.replica_service(&cluster), "kuberlogic-demo-repl");
        assert_eq!(
            pg.credentials_secret(&cluster),
            ("kuberlogic.kuberlogic-demo.credentials".to_string(), "password")
        );
        assert_eq!(
            pg.master_selector(&cluster).get("spilo-role").map(String::as_str),
            Some("master")
        );

        let my = Engine::MySql;
        let cluster = my.cluster_name("demo");
        assert_eq!(cluster, "demo");
        assert_eq!(my.master_service(&cluster), "demo-mysql-master");
        assert_eq!(my.replica_service(&cluster), "demo-mysql-replicas");
        assert_eq!(
            my.credentials_secret(&cluster),
            ("demo-cred".to_string(), "ROOT_PASSWORD")
        );
        assert_eq!(
            my.replica_selector(&cluster).get("role").map(String::as_str),
            Some("replica")
        );
    }
}
