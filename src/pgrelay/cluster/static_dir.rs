use std::sync::Arc;

use async_trait::async_trait;

use crate::pgrelay::cluster::{Cluster, ConnectionInfo, Credential, Database, Directory, Signal};
use crate::pgrelay::config::ClusterEntry;
use crate::pgrelay::Result;

/// A Directory backed by the config file: externally managed clusters that
/// are assumed up. Every readiness signal is pre-fired and no database ever
/// reports shutdown. The real cluster manager replaces this in deployments
/// that create clusters on demand.
pub struct StaticDirectory {
    clusters: Vec<Arc<StaticCluster>>,
}

impl StaticDirectory {
    pub fn from_config(entries: &[ClusterEntry]) -> Self {
        let clusters = entries
            .iter()
            .map(|entry| {
                Arc::new(StaticCluster {
                    id: entry.id.clone(),
                    password: entry.password.clone(),
                    databases: entry.databases.clone(),
                    info: ConnectionInfo {
                        host: entry.host.clone(),
                        credentials: entry
                            .credentials
                            .iter()
                            .map(|c| Credential {
                                username: c.username.clone(),
                                password: c.password.clone(),
                                role: c.role,
                            })
                            .collect(),
                    },
                })
            })
            .collect();
        StaticDirectory { clusters }
    }
}

impl Directory for StaticDirectory {
    fn lookup_password(&self, password: &str) -> Option<Arc<dyn Cluster>> {
        self.clusters
            .iter()
            .find(|c| c.password == password)
            .map(|c| c.clone() as Arc<dyn Cluster>)
    }

    fn get(&self, id: &str) -> Option<Arc<dyn Cluster>> {
        self.clusters
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.clone() as Arc<dyn Cluster>)
    }
}

struct StaticCluster {
    id: String,
    password: String,
    databases: Vec<String>,
    info: ConnectionInfo,
}

#[async_trait]
impl Cluster for StaticCluster {
    fn id(&self) -> &str {
        &self.id
    }

    fn ready(&self) -> Signal {
        Signal::fired()
    }

    fn get_db(&self, name: &str) -> Option<Arc<dyn Database>> {
        if self.databases.iter().any(|db| db == name) {
            Some(Arc::new(StaticDatabase))
        } else {
            None
        }
    }

    async fn info(&self) -> Result<ConnectionInfo> {
        Ok(self.info.clone())
    }
}

struct StaticDatabase;

impl Database for StaticDatabase {
    fn ready(&self) -> Signal {
        Signal::fired()
    }

    fn done(&self) -> Signal {
        // a signal whose trigger is gone never fires
        let (_, signal) = Signal::new();
        signal
    }
}
