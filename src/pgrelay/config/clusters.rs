use serde::Deserialize;

use crate::pgrelay::cluster::Role;

/// A cluster this proxy can route to, as configured in pgrelay.yaml.
/// Used to build the static directory; a cluster manager that creates
/// clusters on demand supplies its own directory instead.
#[derive(Deserialize)]
pub struct ClusterEntry {
    /// id uniquely names the cluster
    pub id: String,
    /// host:port of the backend database server
    pub host: String,
    /// password is the routing token clients present to reach this cluster
    pub password: String,
    /// databases hosted by this cluster
    #[serde(default)]
    pub databases: Vec<String>,
    /// credentials provisioned on the cluster
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
}

#[derive(Deserialize)]
pub struct CredentialEntry {
    pub username: String,
    pub password: String,
    pub role: Role,
}
