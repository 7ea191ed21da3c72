use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Patch, PatchParams},
    Api, Client,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{info, instrument};

use crate::{Error, Result};

use super::ServiceDescriptor;

/// Location of the administrative password inside a Kubernetes secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    pub field: String,
}

/// Administrative credentials of a cluster.
///
/// The password is read fresh for every session so a rotated secret is picked up
/// by the next request. It is redacted from `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: SecretRef,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: SecretRef, password: SecretString) -> Self {
        Self {
            username: username.into(),
            secret,
            password,
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Read the credentials of a service from its operator-managed secret.
    #[instrument(skip_all, fields(service = %descriptor))]
    pub(crate) async fn resolve(client: &Client, descriptor: &ServiceDescriptor) -> Result<Self> {
        let engine = descriptor.engine;
        let (name, field) = engine.credentials_secret(&descriptor.cluster_name());
        let secret = SecretRef {
            name,
            field: field.to_string(),
        };
        let unavailable = || Error::CredentialUnavailable {
            secret: format!("{}/{}", descriptor.namespace, secret.name),
            field: secret.field.clone(),
        };

        let secrets = Api::<Secret>::namespaced(client.clone(), &descriptor.namespace);
        let found = secrets.get_opt(&secret.name).await?.ok_or_else(unavailable)?;

        // `data` is already base64-decoded by the client; `stringData` only shows up
        // on objects that were never round-tripped through the API server
        let raw = found
            .data
            .as_ref()
            .and_then(|d| d.get(&secret.field))
            .map(|b| b.0.clone())
            .or_else(|| {
                found
                    .string_data
                    .as_ref()
                    .and_then(|d| d.get(&secret.field))
                    .map(|s| s.clone().into_bytes())
            })
            .ok_or_else(unavailable)?;
        let password = String::from_utf8(raw).map_err(|_| unavailable())?;

        Ok(Self::new(engine.admin_user(), secret, SecretString::new(password)))
    }

    /// Overwrite the administrative password stored in the secret.
    ///
    /// Existing sessions keep the password they were built with.
    #[instrument(skip(self, client, password))]
    pub(crate) async fn store(&self, client: &Client, namespace: &str, password: &str) -> Result<()> {
        let secrets = Api::<Secret>::namespaced(client.clone(), namespace);
        let patch = json!({
            "stringData": {
                self.secret.field.as_str(): password,
            },
        });

        secrets
            .patch(&self.secret.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(secret = %self.secret.name, "updated administrative password");

        Ok(())
    }
}
