use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::Action,
        events::{Event, EventType, Recorder, Reporter},
        reflector::Store,
        watcher::Config,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, field, info, instrument, warn, Span};

use crate::{
    config::{SessionConfig, WatcherConfig},
    resources::KuberLogicService,
    session::DatabaseManager as _,
    telemetry, Error, Metrics, Result, ServiceDescriptor, Session, SqlErrorKind,
};

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
    /// Latest probe of each service, keyed by `namespace/name`
    pub services: BTreeMap<String, ProbeReport>,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "kuberlogic-watcher".into(),
            services: BTreeMap::new(),
        }
    }
}
impl Diagnostics {
    pub fn recorder(&self, client: Client, service: &KuberLogicService) -> Recorder {
        Recorder::new(client, self.reporter.clone(), service.object_ref(&()))
    }
}

/// Outcome of one replication probe
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub checked_at: Option<DateTime<Utc>>,
    /// Id of the row written on the master
    pub master_record: Option<i64>,
    /// What each replica endpoint returned
    pub replicas: BTreeMap<String, ReplicaReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Latest probe record seen on one replica
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReplicaReading {
    /// Highest id of the probe table; `None` while the table is empty
    pub record: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplicaReading {
    fn new(read: Result<Option<i64>>) -> Self {
        match read {
            Ok(record) => Self {
                record,
                error: None,
            },
            Err(e) => Self {
                record: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl ProbeReport {
    /// How many records each readable replica is behind the master
    pub fn gaps(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        let written = self.master_record.unwrap_or_default();
        self.replicas
            .iter()
            .filter(|(_, reading)| reading.error.is_none())
            .map(move |(replica, reading)| {
                (replica.as_str(), written - reading.record.unwrap_or_default())
            })
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub(crate) fn to_context(
        &self,
        client: Client,
        services: Store<KuberLogicService>,
        session: SessionConfig,
        watcher: WatcherConfig,
    ) -> Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            client,
            services,
            metrics: Metrics::default().register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
            session,
            watcher,
        }))
    }
}

/// The context passed to every reconciliation
pub struct Context {
    /// Kubernetes client
    pub client: Client,

    /// Services currently known to the controller
    pub services: Store<KuberLogicService>,

    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Prometheus metrics
    pub metrics: Metrics,

    /// Configuration of the sessions built for each probe
    pub session: SessionConfig,

    pub watcher: WatcherConfig,
}

pub struct WatcherController {
    state: State,
}

impl WatcherController {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    /// Initialize the controller and shared state (given the crd is installed)
    pub async fn run(
        self,
        session: SessionConfig,
        watcher: WatcherConfig,
    ) -> Result<(), anyhow::Error> {
        // Error handler for failed probes
        fn error_policy(service: Arc<KuberLogicService>, error: &Error, ctx: Arc<Context>) -> Action {
            error!("probe of {} failed: {:?}", service.name_any(), error);
            if let Ok(descriptor) = ServiceDescriptor::try_from(service.as_ref()) {
                ctx.metrics.probe_failure(&descriptor, error);
            }

            if error.is_transient() {
                Action::requeue(Duration::from_secs(5))
            } else {
                Action::requeue(ctx.watcher.interval)
            }
        }

        // Get a k8s client for communicating with the cluster
        let client = Client::try_default().await?;
        let services = Api::<KuberLogicService>::all(client.clone());

        // Test that we can actually query for our CRD (a.k.a. it is installed)
        if let Err(e) = services.list(&ListParams::default().limit(1)).await {
            error!("CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            anyhow::bail!("KuberLogicService CRD is not installed");
        }

        let controller = Controller::new(services, Config::default().any_semantic());
        let context = self
            .state
            .to_context(client, controller.store(), session, watcher)?;

        let probes = controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, context.clone())
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()));

        tokio::select! {
            _ = probes => {},
            _ = forget_deleted_periodically(context) => {},
        }

        Ok(())
    }
}

/// Probe the replication of a single service
#[instrument(skip(ctx, service), fields(trace_id))]
async fn reconcile(service: Arc<KuberLogicService>, ctx: Arc<Context>) -> Result<Action> {
    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    ctx.diagnostics.write().await.last_event = Utc::now();

    let descriptor = ServiceDescriptor::try_from(service.as_ref())?;
    if !service.is_ready() {
        debug!("\"{descriptor}\" is not ready yet");
        return Ok(Action::requeue(ctx.watcher.interval));
    }

    // Take some metrics to see the average probe time
    let _timer = ctx.metrics.count_and_measure();

    info!("Probing replication of \"{descriptor}\"");
    let (report, failure) = match probe(&descriptor, &ctx).await {
        Ok(report) => (report, None),
        Err(e) => {
            let report = ProbeReport {
                checked_at: Some(Utc::now()),
                error: Some(e.to_string()),
                ..Default::default()
            };
            (report, Some(e))
        }
    };

    for (replica, reading) in &report.replicas {
        if let Some(error) = &reading.error {
            warn!(replica, %error, "replica of \"{descriptor}\" could not be read");
        }
    }
    for (replica, gap) in report.gaps() {
        if gap > 0 {
            warn!(replica, gap, "replica of \"{descriptor}\" is lagging");
        }
    }
    record(&ctx, &descriptor, report).await;

    if let Some(e) = failure {
        let recorder = ctx
            .diagnostics
            .read()
            .await
            .recorder(ctx.client.clone(), &service);
        let published = recorder
            .publish(Event {
                type_: EventType::Warning,
                reason: "ProbeFailed".into(),
                note: Some(e.to_string()),
                action: "Probing".into(),
                secondary: None,
            })
            .await;
        if let Err(publish) = published {
            warn!("failed to publish probe event: {publish}");
        }

        return Err(e);
    }

    Ok(Action::requeue(ctx.watcher.interval))
}

/// Store a report and align the gap gauges of its service with it
async fn record(ctx: &Context, descriptor: &ServiceDescriptor, report: ProbeReport) {
    let service = descriptor.to_string();

    let mut diagnostics = ctx.diagnostics.write().await;
    if let Some(previous) = diagnostics.services.get(&service) {
        let measured: BTreeSet<&str> = report.gaps().map(|(replica, _)| replica).collect();
        previous
            .replicas
            .keys()
            .filter(|replica| !measured.contains(replica.as_str()))
            .for_each(|replica| ctx.metrics.forget_replica(&service, replica));
    }
    for (replica, gap) in report.gaps() {
        ctx.metrics.replication_gap(descriptor, replica, gap);
    }
    diagnostics.services.insert(service, report);
}

/// Drop the reports and gap gauges of services the controller no longer knows
async fn forget_deleted(ctx: &Context) {
    let live: BTreeSet<String> = ctx
        .services
        .state()
        .iter()
        .filter_map(|s| Some(format!("{}/{}", s.namespace()?, s.name_any())))
        .collect();

    ctx.diagnostics
        .write()
        .await
        .services
        .retain(|service, report| {
            if live.contains(service) {
                return true;
            }
            debug!("forgetting deleted service \"{service}\"");
            for replica in report.replicas.keys() {
                ctx.metrics.forget_replica(service, replica);
            }
            false
        });
}

async fn forget_deleted_periodically(ctx: Arc<Context>) {
    // An empty store before the first listing would forget everything
    if ctx.services.wait_until_ready().await.is_err() {
        return;
    }

    let mut ticks = tokio::time::interval(ctx.watcher.interval.max(Duration::from_secs(1)));
    loop {
        ticks.tick().await;
        forget_deleted(&ctx).await;
    }
}

/// Write a record on the master and read the latest one back from every replica
async fn probe(descriptor: &ServiceDescriptor, ctx: &Context) -> Result<ProbeReport> {
    let config = &ctx.watcher;

    // The probe database must exist before a session can target it
    let admin = Session::new(
        ctx.client.clone(),
        descriptor.clone(),
        "",
        ctx.session.clone(),
    )
    .await?;
    match admin.database().create(&config.probe_database).await {
        Err(e) if e.sql_kind() == Some(SqlErrorKind::AlreadyExists) => {}
        other => other?,
    }

    let session = Session::from_parts(
        ctx.client.clone(),
        descriptor.clone(),
        admin.topology().clone(),
        admin.credentials().clone(),
        config.probe_database.as_str(),
        ctx.session.clone(),
    );
    session.create_table(&config.probe_table).await?;

    let written = session
        .write_record(session.master_endpoint(), &config.probe_table)
        .await?;

    Ok(ProbeReport {
        checked_at: Some(Utc::now()),
        master_record: Some(written),
        replicas: read_replicas(&session, &config.probe_table).await,
        error: None,
    })
}

/// Read the probe table on every replica; one unreadable replica does not hide the others
async fn read_replicas(session: &Session, table: &str) -> BTreeMap<String, ReplicaReading> {
    let mut replicas = BTreeMap::new();
    for endpoint in session.replica_endpoints() {
        let read = session.read_last_record(endpoint, table).await;
        replicas.insert(endpoint.clone(), ReplicaReading::new(read));
    }
    replicas
}
