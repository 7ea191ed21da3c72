//! Helpers to drive sessions against a mocked Kubernetes API server
use std::collections::BTreeMap;

use http::{Request, Response, StatusCode};
use hyper::{body::to_bytes, Body};
use k8s_openapi::{
    api::core::v1::{Pod, PodStatus, Secret, Service, ServicePort, ServiceSpec},
    ByteString,
};
use kube::{api::ObjectMeta, Client};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;

use crate::{config::SessionConfig, Engine};

use super::{Credentials, PodSelectors, SecretRef, ServiceDescriptor, Session, Topology};

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// Answers the requests a session makes, one at a time and in order
pub struct ApiServerVerifier(ApiServerHandle);

pub fn mock_client() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "default");
    (client, ApiServerVerifier(handle))
}

impl ApiServerVerifier {
    async fn next(&mut self) -> (Request<Body>, tower_test::mock::SendResponse<Response<Body>>) {
        self.0
            .next_request()
            .await
            .expect("service not called")
    }

    /// Expect a GET on `path` and answer with `object`
    pub async fn expect_get(&mut self, path: &str, object: &impl Serialize) {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().path(), path);

        send.send_response(json_response(StatusCode::OK, object));
    }

    /// Expect a GET on `path` and answer that the object does not exist
    pub async fn expect_not_found(&mut self, path: &str) {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().path(), path);

        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{path} not found"),
            "reason": "NotFound",
            "code": 404,
        });
        send.send_response(json_response(StatusCode::NOT_FOUND, &status));
    }

    /// Expect a list on `path` filtered by `selector` and answer with `items`
    pub async fn expect_list(&mut self, path: &str, selector: &str, items: Vec<impl Serialize>) {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().path(), path);
        let query = request.uri().query().unwrap_or_default().to_string();
        let expected = form_urlencoded(selector);
        assert!(
            query.contains(&format!("labelSelector={expected}")),
            "{query} does not select {selector}"
        );

        let list = json!({
            "apiVersion": "v1",
            "kind": "List",
            "metadata": { "resourceVersion": "" },
            "items": items,
        });
        send.send_response(json_response(StatusCode::OK, &list));
    }

    /// Expect a merge patch on `path`, answer with `object` and return the patch body
    pub async fn expect_merge_patch(
        &mut self,
        path: &str,
        object: &impl Serialize,
    ) -> serde_json::Value {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(request.uri().path(), path);
        assert_eq!(
            request.headers().get("Content-Type").unwrap(),
            "application/merge-patch+json"
        );

        let body = to_bytes(request.into_body()).await.unwrap();
        send.send_response(json_response(StatusCode::OK, object));
        serde_json::from_slice(&body).expect("patch is json")
    }

    /// Expect a POST on `path`, answer with the created object and return it
    pub async fn expect_create(&mut self, path: &str) -> serde_json::Value {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().path(), path);

        let body = to_bytes(request.into_body()).await.unwrap();
        let created: serde_json::Value = serde_json::from_slice(&body).expect("object is json");
        send.send_response(json_response(StatusCode::CREATED, &created));
        created
    }
}

fn json_response(status: StatusCode, object: &impl Serialize) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(object).unwrap()))
        .unwrap()
}

fn form_urlencoded(value: &str) -> String {
    value.replace('=', "%3D").replace(',', "%2C").replace('/', "%2F")
}

pub fn service(name: &str, ports: Vec<(Option<&str>, i32)>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .into_iter()
                    .map(|(name, port)| ServicePort {
                        name: name.map(Into::into),
                        port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod(name: &str, phase: &str, ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.into()),
            pod_ip: Some(ip.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn secret(name: &str, field: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            field.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// A session whose topology points nowhere; usable until it sends SQL
pub fn session(engine: Engine, client: Client) -> Session {
    let descriptor = ServiceDescriptor::new(engine, "default", "demo", 0);
    let cluster = descriptor.cluster_name();
    let (secret, field) = engine.credentials_secret(&cluster);

    let topology = Topology {
        master_endpoint: format!("{}.default.svc.cluster.local", engine.master_service(&cluster)),
        replica_endpoints: vec![],
        access_port: engine.default_port(),
        replica_port: engine.default_port(),
        pod_selectors: PodSelectors {
            master: engine.master_selector(&cluster),
            replica: engine.replica_selector(&cluster),
        },
    };
    let credentials = Credentials::new(
        engine.admin_user(),
        SecretRef {
            name: secret,
            field: field.to_string(),
        },
        SecretString::new("hunter2".into()),
    );

    Session::from_parts(
        client,
        descriptor,
        topology,
        credentials,
        "",
        SessionConfig::default(),
    )
}
