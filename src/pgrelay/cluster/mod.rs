mod registry;
mod signal;
mod static_dir;

pub use self::registry::{KeyRegistration, KeyRegistry};
pub use self::signal::{Signal, Trigger};
pub use self::static_dir::StaticDirectory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::pgrelay::Result;

/// The directory of database clusters the proxy can route to.
///
/// The proxy only consumes this interface; creating, provisioning and
/// tearing down clusters is the cluster manager's business.
pub trait Directory: Send + Sync + 'static {
    /// Maps the credential token carried in a client startup to the cluster
    /// the caller is entitled to reach.
    fn lookup_password(&self, password: &str) -> Option<Arc<dyn Cluster>>;

    /// Direct lookup by cluster id, for pre-authenticated connections.
    fn get(&self, id: &str) -> Option<Arc<dyn Cluster>>;
}

/// A locally managed database server instance with one or more databases.
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Fires once the cluster is usable.
    fn ready(&self) -> Signal;

    fn get_db(&self, name: &str) -> Option<Arc<dyn Database>>;

    /// How to reach and log in to the cluster. May block while the cluster
    /// manager collects it.
    async fn info(&self) -> Result<ConnectionInfo>;
}

/// A single database within a cluster.
pub trait Database: Send + Sync + 'static {
    /// Fires once initial setup (creation, migrations) has completed.
    fn ready(&self) -> Signal;

    /// Fires when the database is shutting down.
    fn done(&self) -> Signal;
}

/// The kind of role a credential belongs to.
#[derive(Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Superuser,
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Debug)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// How to reach a cluster: the backend address and the credentials the
/// cluster manager provisioned on it.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    /// host:port of the backend server
    pub host: String,
    pub credentials: Vec<Credential>,
}

impl ConnectionInfo {
    /// Returns the first credential matching the role preference list,
    /// in preference order.
    pub fn first(&self, roles: &[Role]) -> Option<&Credential> {
        roles
            .iter()
            .find_map(|role| self.credentials.iter().find(|c| c.role == *role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(username: &str, role: Role) -> Credential {
        Credential {
            username: username.to_string(),
            password: String::new(),
            role,
        }
    }

    #[test]
    fn test_first_prefers_role_order() {
        let info = ConnectionInfo {
            host: "localhost:5432".to_string(),
            credentials: vec![
                cred("reader", Role::ReadOnly),
                cred("root", Role::Superuser),
                cred("cluster-admin", Role::Admin),
            ],
        };
        let c = info.first(&[Role::Admin, Role::Superuser]).unwrap();
        assert_eq!(c.username, "cluster-admin");

        let info = ConnectionInfo {
            host: "localhost:5432".to_string(),
            credentials: vec![cred("reader", Role::ReadOnly), cred("root", Role::Superuser)],
        };
        let c = info.first(&[Role::Admin, Role::Superuser]).unwrap();
        assert_eq!(c.username, "root");

        assert!(info.first(&[Role::Admin]).is_none());
    }
}
