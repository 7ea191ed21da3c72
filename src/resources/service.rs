use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a managed database service
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "KuberLogicService",
    group = "kuberlogic.com",
    version = "v1",
    status = "KuberLogicServiceStatus",
    shortname = "kls",
    category = "kuberlogic",
    doc = "A managed database cluster",
    namespaced,
    printcolumn = r#"{ "name": "Type", "type": "string", "description": "The cluster type", "jsonPath": ".spec.type" }"#,
    printcolumn = r#"{ "name": "Replicas", "type": "integer", "description": "The number of desired replicas", "jsonPath": ".spec.replicas" }"#,
    printcolumn = r#"{ "name": "Volume", "type": "string", "description": "Volume size for the cluster", "jsonPath": ".spec.volumeSize" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct KuberLogicServiceSpec {
    /// Type of the cluster, either `postgresql` or `mysql`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Amount of read replicas.
    #[serde(default)]
    #[schemars(range(min = 0, max = 5))]
    pub replicas: i32,

    /// Version of the database engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Size of the data volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<String>,
}

/// The observed state of a service, as reported by the operator.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct KuberLogicServiceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl KuberLogicService {
    /// Whether the operator reports the cluster as ready
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }
}
