use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Pod, Service, ServicePort},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{api::ListParams, Api, Client, ResourceExt as _};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::{config::SessionConfig, Engine, Error, Result};

use super::ServiceDescriptor;

/// Where the master and replicas of a cluster can be reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// DNS name of the Kubernetes service routing to the master
    pub master_endpoint: String,

    /// Pod IPs of the running replicas, ordered by pod name
    pub replica_endpoints: Vec<String>,

    /// Port published by the master service
    pub access_port: u16,

    /// Port the replica pods listen on
    pub replica_port: u16,

    pub pod_selectors: PodSelectors,
}

/// Label selectors matching the master and replica pods of a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodSelectors {
    pub master: BTreeMap<String, String>,
    pub replica: BTreeMap<String, String>,
}

impl Topology {
    /// Resolve the topology of a service from the objects its operator maintains.
    #[instrument(skip_all, fields(service = %descriptor))]
    pub(crate) async fn resolve(
        client: &Client,
        descriptor: &ServiceDescriptor,
        config: &SessionConfig,
    ) -> Result<Self> {
        let engine = descriptor.engine;
        let cluster = descriptor.cluster_name();
        let namespace = &descriptor.namespace;

        let services = Api::<Service>::namespaced(client.clone(), namespace);
        let master_name = engine.master_service(&cluster);
        let master = services
            .get_opt(&master_name)
            .await?
            .ok_or_else(|| Error::TopologyUnresolved {
                service: format!("{namespace}/{master_name}"),
                reason: "master service not found".into(),
            })?;

        let pod_selectors = PodSelectors {
            master: engine.master_selector(&cluster),
            replica: engine.replica_selector(&cluster),
        };

        // Zero-replica deployments have nothing to look for
        let replicas = if descriptor.replicas == 0 {
            Vec::new()
        } else {
            let pods = Api::<Pod>::namespaced(client.clone(), namespace);
            let params = ListParams::default().labels(&label_selector(&pod_selectors.replica));
            let mut replicas = pods.list(&params).await?.items;
            replicas.retain(|p| running_ip(p).is_some());
            replicas.sort_by_key(|p| p.name_any());
            replicas
        };
        let access_port = access_port(engine, &master);

        let topology = Topology {
            master_endpoint: format!(
                "{master_name}.{namespace}.svc.{}",
                config.cluster_domain
            ),
            replica_endpoints: replicas.iter().filter_map(running_ip).collect(),
            access_port,
            replica_port: replica_port(engine, &master, &replicas, access_port),
            pod_selectors,
        };
        debug!(?topology, "resolved topology");

        Ok(topology)
    }
}

/// The database port of a service: the one named after the engine, or a lone unnamed one
fn database_port(engine: Engine, service: &Service) -> Option<&ServicePort> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    match ports {
        [only] if only.name.is_none() => Some(only),
        _ => ports
            .iter()
            .find(|p| p.name.as_deref() == Some(engine.port_name())),
    }
}

/// The port published by the master service, or the engine default
fn access_port(engine: Engine, service: &Service) -> u16 {
    database_port(engine, service)
        .and_then(|p| u16::try_from(p.port).ok())
        .unwrap_or(engine.default_port())
}

/// The port replica pods listen on.
///
/// Follows the service's target port, resolving a named one against the pods'
/// containers. Without a target port the pods listen on the published one.
fn replica_port(engine: Engine, service: &Service, replicas: &[Pod], published: u16) -> u16 {
    let port = database_port(engine, service);
    let container_port = match port.and_then(|p| p.target_port.as_ref()) {
        Some(IntOrString::Int(target)) => return u16::try_from(*target).unwrap_or(published),
        Some(IntOrString::String(name)) => name.as_str(),
        None if port.is_some() => return published,
        None => engine.port_name(),
    };

    replicas
        .iter()
        .filter_map(|p| p.spec.as_ref())
        .flat_map(|s| &s.containers)
        .flat_map(|c| c.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(container_port))
        .and_then(|p| u16::try_from(p.container_port).ok())
        .unwrap_or(published)
}

fn running_ip(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    if status.phase.as_deref() != Some("Running") {
        return None;
    }
    status.pod_ip.clone()
}

/// Render a label set as a Kubernetes equality-based selector
pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
