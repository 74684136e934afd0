mod common;

use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dog_core::{Dependency, Deps, DogApp, DogModule, Instance, KeyedDurableStrategy, Provider, Reflector, Scope, Token};
use dog_queue_module::prelude::*;
use dog_queue_module::{RegistrationState, ShutdownCoordinator};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_test::traced_test;

use common::{eventually, CountingDriver};

// -- components -----------------------------------------------------------

#[derive(Default)]
struct Recorder {
    worker: HostedWorker,
    seen: Mutex<Vec<String>>,
    completed: AtomicUsize,
    vip_completed: AtomicUsize,
}

#[async_trait]
impl WorkerHost for Recorder {
    async fn process(&self, job: Job) -> Result<Value, JobError> {
        self.seen.lock().push(job.name.clone());
        Ok(json!({ "handled": job.name }))
    }

    fn worker_slot(&self) -> &HostedWorker {
        &self.worker
    }
}

fn annotate_recorder(reflector: &Reflector, queue: &str) {
    Annotate::<Recorder>::new(reflector)
        .processor(ProcessorMetadata::new(queue))
        .worker_options(WorkerOptions::new().with("concurrency", 4))
        .worker_host()
        .on_worker_event("on_completed", OnEventMetadata::new("completed"), |recorder, _event| {
            recorder.completed.fetch_add(1, Ordering::SeqCst);
        })
        .on_worker_event("on_vip", OnEventMetadata::new("completed").for_job("vip"), |recorder, _event| {
            recorder.vip_completed.fetch_add(1, Ordering::SeqCst);
        });
}

fn recorder_module() -> DogModule {
    DogModule::new("Workers").provider(Provider::class(vec![], |_deps: Deps| async { Ok(Recorder::default()) }))
}

#[derive(Default)]
struct CompletedListener {
    events: HostedQueueEvents,
    completed: AtomicUsize,
}

impl QueueEventsHost for CompletedListener {
    fn events_slot(&self) -> &HostedQueueEvents {
        &self.events
    }
}

fn annotate_listener(reflector: &Reflector, queue: &str) {
    Annotate::<CompletedListener>::new(reflector)
        .queue_events_listener(QueueEventsListenerMetadata::new(queue))
        .queue_events_host()
        .on_queue_event("on_completed", OnEventMetadata::new("completed"), |listener, _event| {
            listener.completed.fetch_add(1, Ordering::SeqCst);
        });
}

/// Annotated as a processor, but never declared a `WorkerHost`.
struct NotAWorker;

fn memory_module(driver: &CountingDriver) -> QueueModule {
    QueueModule::new(QueueModuleConfig::new(Arc::new(driver.clone())))
}

async fn add(app: &DogApp, queue: &str, name: &str, data: Value) {
    get_queue(app, Some(queue))
        .unwrap()
        .add(name, data, JobOptions::default())
        .await
        .unwrap();
}

// -- end to end -----------------------------------------------------------

#[tokio::test]
async fn static_callback_runs_once_and_completed_fires_once() {
    let app = DogApp::new();
    annotate_listener(app.reflector(), "jobs");

    let counter = Arc::new(AtomicUsize::new(0));
    let calls = counter.clone();
    let queues = QueueModule::memory();
    app.import(queues.register_queue([QueueRegistration::new("jobs").processor(ProcessorBinding::callback(
        move |job: Job| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(job.data)
            }
        },
    ))]))
    .unwrap();
    app.import(
        DogModule::new("Listeners")
            .provider(Provider::class(vec![], |_deps: Deps| async { Ok(CompletedListener::default()) })),
    )
    .unwrap();
    app.init().await.unwrap();

    add(&app, "jobs", "count", json!({})).await;

    let listener = app.resolve::<CompletedListener>().unwrap();
    eventually(|| listener.completed.load(Ordering::SeqCst) == 1).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(listener.queue_events().is_ok());

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(listener.completed.load(Ordering::SeqCst), 1);
    app.close().await.unwrap();
}

// -- static processors ----------------------------------------------------

#[tokio::test]
async fn static_processor_serves_every_job_from_one_instance() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "mail");
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    add(&app, "mail", "first", json!({})).await;
    add(&app, "mail", "second", json!({})).await;

    let recorder = app.resolve::<Recorder>().unwrap();
    eventually(|| recorder.seen.lock().len() == 2).await;
    let mut seen = recorder.seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["first", "second"]);

    let worker = recorder.worker().unwrap();
    assert_eq!(worker.name(), "mail");
    // declared worker options win over the queue's
    assert_eq!(worker.opts().concurrency(), 4);
    app.close().await.unwrap();
}

#[tokio::test]
async fn hooks_found_on_the_prototype_run_on_the_live_instance() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "mail");
    let methods: Vec<_> = app
        .reflector()
        .methods(TypeId::of::<Recorder>())
        .iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(methods, vec!["on_completed", "on_vip"]);

    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    add(&app, "mail", "vip", json!({})).await;
    add(&app, "mail", "regular", json!({})).await;

    let recorder = app.resolve::<Recorder>().unwrap();
    eventually(|| recorder.completed.load(Ordering::SeqCst) == 2).await;
    assert_eq!(recorder.vip_completed.load(Ordering::SeqCst), 1);
    app.close().await.unwrap();
}

#[tokio::test]
async fn value_and_factory_providers_are_classified_by_their_instance() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "mail");
    annotate_listener(app.reflector(), "mail");
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(
        DogModule::new("Aliased")
            .provider(Provider::value("MAIL_RECORDER", Recorder::default()))
            .provider(Provider::factory("MAIL_LISTENER", vec![], |_deps: Deps| async {
                Ok(CompletedListener::default())
            })),
    )
    .unwrap();
    app.init().await.unwrap();

    add(&app, "mail", "welcome", json!({})).await;

    let recorder = app.get_instance::<Recorder>("MAIL_RECORDER").unwrap();
    let listener = app.get_instance::<CompletedListener>("MAIL_LISTENER").unwrap();
    eventually(|| listener.completed.load(Ordering::SeqCst) == 1).await;
    assert_eq!(recorder.seen.lock().as_slice(), ["welcome"]);
    assert!(recorder.worker().is_ok());
    app.close().await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn request_scoped_factory_providers_are_skipped_with_a_log() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "mail");
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(
        DogModule::new("Aliased").provider(
            Provider::factory("SCOPED_RECORDER", vec![], |_deps: Deps| async { Ok(Recorder::default()) })
                .with_scope(Scope::Request),
        ),
    )
    .unwrap();
    app.init().await.unwrap();

    assert!(logs_contain("has no instance to classify"));
    assert_eq!(app.resolve::<ShutdownCoordinator>().unwrap().tracked(), 0);
    app.close().await.unwrap();
}

// -- request scope --------------------------------------------------------

static SERIAL: AtomicUsize = AtomicUsize::new(0);

fn next_serial() -> usize {
    SERIAL.fetch_add(1, Ordering::SeqCst)
}

struct PerJob {
    serial: usize,
}

struct TenantCache {
    serial: usize,
}

#[derive(Default)]
struct ScopeLog {
    /// `(per-job serial, tenant serial, worker visible)` per processed job
    entries: Mutex<Vec<(usize, usize, bool)>>,
}

struct ScopedProcessor {
    worker: HostedWorker,
    per_job: Arc<PerJob>,
    tenant: Arc<TenantCache>,
    log: Arc<ScopeLog>,
}

#[async_trait]
impl WorkerHost for ScopedProcessor {
    async fn process(&self, job: Job) -> Result<Value, JobError> {
        self.log
            .entries
            .lock()
            .push((self.per_job.serial, self.tenant.serial, self.worker().is_ok()));
        Ok(job.data)
    }

    fn worker_slot(&self) -> &HostedWorker {
        &self.worker
    }
}

fn scoped_module() -> DogModule {
    let per_job = Provider::class(vec![Dependency::required(Token::request())], |deps: Deps| async move {
        deps.get::<Job>(0)?;
        Ok(PerJob { serial: next_serial() })
    })
    .with_scope(Scope::Request);
    let tenant = Provider::class(vec![Dependency::required(Token::request())], |_deps: Deps| async move {
        Ok(TenantCache { serial: next_serial() })
    })
    .with_scope(Scope::Request)
    .durable();
    let processor = Provider::class(
        vec![
            Dependency::required(Token::of::<PerJob>()),
            Dependency::required(Token::of::<TenantCache>()),
            Dependency::required("SCOPE_LOG"),
        ],
        |deps: Deps| async move {
            Ok(ScopedProcessor {
                worker: HostedWorker::new(),
                per_job: deps.get::<PerJob>(0)?,
                tenant: deps.get::<TenantCache>(1)?,
                log: deps.get::<ScopeLog>(2)?,
            })
        },
    )
    .with_scope(Scope::Request);

    DogModule::new("Scoped")
        .provider(Provider::value("SCOPE_LOG", ScopeLog::default()))
        .provider(per_job)
        .provider(tenant)
        .provider(processor)
}

fn annotate_scoped(reflector: &Reflector) {
    Annotate::<ScopedProcessor>::new(reflector)
        .processor(ProcessorMetadata::new("scoped").with_scope(Scope::Request))
        .worker_host();
}

#[tokio::test]
async fn request_scoped_processor_is_resolved_per_job() {
    let app = DogApp::new();
    annotate_scoped(app.reflector());
    app.use_context_strategy(Arc::new(KeyedDurableStrategy::new(|request: &Instance| {
        request
            .downcast_ref::<Job>()
            .and_then(|job| job.data["tenant"].as_str().map(str::to_string))
    })));
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("scoped")]))
        .unwrap();
    app.import(scoped_module()).unwrap();
    app.init().await.unwrap();

    let log = app.get_instance::<ScopeLog>("SCOPE_LOG").unwrap();
    for (n, tenant) in ["acme", "acme", "globex"].into_iter().enumerate() {
        add(&app, "scoped", "sync", json!({ "tenant": tenant })).await;
        eventually(|| log.entries.lock().len() == n + 1).await;
    }

    let entries = log.entries.lock().clone();
    let (first, second, third) = (entries[0], entries[1], entries[2]);
    // fresh per-job dependency every time
    assert_ne!(first.0, second.0);
    assert_ne!(second.0, third.0);
    // durable dependency shared by jobs of one tenant
    assert_eq!(first.1, second.1);
    assert_ne!(first.1, third.1);
    // each fresh instance sees the worker
    assert!(entries.iter().all(|entry| entry.2));

    // per-job instances are released, durable ones stay
    let container = app.container().clone();
    eventually(|| container.arena_len() == 2 && container.context_ids().tracked() == 0).await;
    app.close().await.unwrap();
}

static PANICS: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct Exploding {
    worker: HostedWorker,
}

#[async_trait]
impl WorkerHost for Exploding {
    async fn process(&self, _job: Job) -> Result<Value, JobError> {
        PANICS.fetch_add(1, Ordering::SeqCst);
        panic!("exploded");
    }

    fn worker_slot(&self) -> &HostedWorker {
        &self.worker
    }
}

#[tokio::test]
async fn panicking_request_scoped_processor_releases_its_context() {
    let app = DogApp::new();
    Annotate::<Exploding>::new(app.reflector())
        .processor(ProcessorMetadata::new("boom"))
        .worker_host();
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("boom")]))
        .unwrap();
    app.import(DogModule::new("Boom").provider(
        Provider::class(vec![], |_deps: Deps| async { Ok(Exploding::default()) }).with_scope(Scope::Request),
    ))
    .unwrap();
    app.init().await.unwrap();

    for _ in 0..3 {
        add(&app, "boom", "explode", json!({})).await;
    }
    let container = app.container().clone();
    eventually(|| {
        PANICS.load(Ordering::SeqCst) == 3 && container.arena_len() == 0 && container.context_ids().tracked() == 0
    })
    .await;
    app.close().await.unwrap();
}

#[derive(Default)]
struct HookedScoped {
    worker: HostedWorker,
}

#[async_trait]
impl WorkerHost for HookedScoped {
    async fn process(&self, job: Job) -> Result<Value, JobError> {
        Ok(job.data)
    }

    fn worker_slot(&self) -> &HostedWorker {
        &self.worker
    }
}

#[tokio::test]
#[traced_test]
async fn hooks_on_request_scoped_processors_are_skipped_with_a_warning() {
    let app = DogApp::new();
    Annotate::<HookedScoped>::new(app.reflector())
        .processor(ProcessorMetadata::new("scoped"))
        .worker_host()
        .on_worker_event("on_failed", OnEventMetadata::new("failed"), |_processor, _event| {});
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("scoped")]))
        .unwrap();
    app.import(DogModule::new("Scoped").provider(
        Provider::class(vec![], |_deps: Deps| async { Ok(HookedScoped::default()) }).with_scope(Scope::Request),
    ))
    .unwrap();
    app.init().await.unwrap();

    assert!(logs_contain("event hooks on request-scoped processors are not supported"));
    // the worker itself is still created
    assert_eq!(app.resolve::<ShutdownCoordinator>().unwrap().tracked(), 1);
    app.close().await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn request_scoped_listeners_are_skipped_with_a_warning() {
    let driver = CountingDriver::new();
    let app = DogApp::new();
    annotate_listener(app.reflector(), "mail");
    app.import(memory_module(&driver).register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(DogModule::new("Listeners").provider(
        Provider::class(vec![], |_deps: Deps| async { Ok(CompletedListener::default()) })
            .with_scope(Scope::Request),
    ))
    .unwrap();
    app.init().await.unwrap();

    assert!(logs_contain("request-scoped event listeners are not supported"));
    assert_eq!(driver.counters.events.load(Ordering::SeqCst), 0);
    app.close().await.unwrap();
}

// -- failures -------------------------------------------------------------

#[tokio::test]
async fn processor_without_worker_host_is_rejected_before_any_worker_exists() {
    let driver = CountingDriver::new();
    let app = DogApp::new();
    Annotate::<NotAWorker>::new(app.reflector()).processor(ProcessorMetadata::new("jobs"));
    app.import(memory_module(&driver).register_queue([QueueRegistration::new("jobs")]))
        .unwrap();
    app.import(DogModule::new("Broken").provider(Provider::class(vec![], |_deps: Deps| async { Ok(NotAWorker) })))
        .unwrap();

    let err = QueueModuleError::from_container(app.init().await.unwrap_err());
    match err {
        QueueModuleError::InvalidProcessorClass { class } => assert_eq!(class, "NotAWorker"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.counters.workers.load(Ordering::SeqCst), 0);
    assert_eq!(app.resolve::<QueueRegistrar>().unwrap().state(), RegistrationState::Failed);
}

#[tokio::test]
async fn processor_for_an_unknown_queue_fails_registration() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "nowhere");
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();

    let err = QueueModuleError::from_container(app.init().await.unwrap_err());
    assert!(matches!(err, QueueModuleError::NoQueueFound { ref name } if name == "nowhere"));
}

#[tokio::test]
async fn listener_for_an_unknown_queue_fails_registration() {
    let app = DogApp::new();
    annotate_listener(app.reflector(), "nowhere");
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(
        DogModule::new("Listeners")
            .provider(Provider::class(vec![], |_deps: Deps| async { Ok(CompletedListener::default()) })),
    )
    .unwrap();

    let err = QueueModuleError::from_container(app.init().await.unwrap_err());
    assert!(matches!(err, QueueModuleError::NoEventStreamFound { ref name } if name == "nowhere"));
}

#[tokio::test]
async fn shared_configuration_stands_in_for_a_missing_queue() {
    let app = DogApp::new();
    Annotate::<Recorder>::new(app.reflector())
        .processor(ProcessorMetadata::new("reports").with_config_key("primary"))
        .worker_host();
    let queues = QueueModule::memory();
    app.import(queues.for_root_config("primary", QueueOptions::new().with("prefix", "primary")))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    let worker = app.resolve::<Recorder>().unwrap().worker().unwrap();
    assert_eq!(worker.name(), "reports");
    assert_eq!(worker.opts().prefix(), "primary");
    app.close().await.unwrap();
}

// -- manual registration --------------------------------------------------

#[tokio::test]
async fn manual_registration_waits_for_the_caller() {
    let app = DogApp::new();
    app.set("queue.manual_registration", "true");
    annotate_recorder(app.reflector(), "mail");
    let extra = QueueExtraOptions::from_config(&app.config_snapshot());
    let queues = QueueModule::new(QueueModuleConfig::memory().with_extra(extra));
    app.import(queues.register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    let recorder = app.resolve::<Recorder>().unwrap();
    let registrar = app.resolve::<QueueRegistrar>().unwrap();
    assert_eq!(registrar.state(), RegistrationState::Unregistered);
    let premature = match recorder.worker() {
        Err(err) => err,
        Ok(_) => panic!("worker exists before registration"),
    };
    assert!(premature.to_string().contains("QueueRegistrar::register()"));

    registrar.register().await.unwrap();
    assert!(recorder.worker().is_ok());
    assert_eq!(registrar.state(), RegistrationState::Registered);

    // second call is a no-op
    let coordinator = app.resolve::<ShutdownCoordinator>().unwrap();
    let tracked = coordinator.tracked();
    registrar.register().await.unwrap();
    assert_eq!(coordinator.tracked(), tracked);

    app.close().await.unwrap();
    assert_eq!(registrar.state(), RegistrationState::Closed);
    assert!(matches!(
        registrar.register().await,
        Err(QueueModuleError::RegistrationAborted { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hooks_see_jobs_that_were_waiting_before_registration() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "mail");
    let queues = QueueModule::new(QueueModuleConfig::memory().with_extra(QueueExtraOptions::manual()));
    app.import(queues.register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    for n in 0..20 {
        add(&app, "mail", &format!("job-{n}"), json!({})).await;
    }
    app.resolve::<QueueRegistrar>().unwrap().register().await.unwrap();

    let recorder = app.resolve::<Recorder>().unwrap();
    eventually(|| recorder.seen.lock().len() == 20).await;
    eventually(|| recorder.completed.load(Ordering::SeqCst) == 20).await;
    app.close().await.unwrap();
}

#[tokio::test]
async fn autorun_false_leaves_the_worker_paused() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "mail");
    Annotate::<Recorder>::new(app.reflector()).worker_options(WorkerOptions::new().with("autorun", false));
    app.import(QueueModule::memory().register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    let recorder = app.resolve::<Recorder>().unwrap();
    let worker = recorder.worker().unwrap();
    assert!(!worker.is_running());

    add(&app, "mail", "later", json!({})).await;
    worker.run().unwrap();
    eventually(|| recorder.completed.load(Ordering::SeqCst) == 1).await;
    app.close().await.unwrap();
}

#[tokio::test]
async fn registration_is_not_retried_after_a_failure() {
    let app = DogApp::new();
    annotate_recorder(app.reflector(), "nowhere");
    let queues = QueueModule::new(QueueModuleConfig::memory().with_extra(QueueExtraOptions::manual()));
    app.import(queues.register_queue([QueueRegistration::new("mail")]))
        .unwrap();
    app.import(recorder_module()).unwrap();
    app.init().await.unwrap();

    let registrar = app.resolve::<QueueRegistrar>().unwrap();
    assert!(matches!(
        registrar.register().await,
        Err(QueueModuleError::NoQueueFound { .. })
    ));
    assert_eq!(registrar.state(), RegistrationState::Failed);
    assert!(matches!(
        registrar.register().await,
        Err(QueueModuleError::RegistrationAborted { .. })
    ));
}
