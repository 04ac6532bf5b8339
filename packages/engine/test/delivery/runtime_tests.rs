use cdrl_engine::delivery::runtime::ReaderPool;
use cdrl_engine::delivery::ElementView;
use cdrl_engine::{
    BeforeVisitor, ContentHandler, ContentHandlerBinding, EngineRuntimeFactory, ExecutionContext,
    FilterError, ProfileSet, ResourceConfig, VisitResult,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

struct Probe {
    label: String,
    log: Log,
}

impl BeforeVisitor for Probe {
    fn visit_before(&self, element: &ElementView, _c: &mut ExecutionContext) -> VisitResult {
        self.log
            .0
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.label, element.local));
        Ok(())
    }
}

fn probe_binding(selector: &str, label: &str, profile: Option<&str>, log: &Log) -> ContentHandlerBinding {
    let mut config = ResourceConfig::for_selector(selector).unwrap();
    config.target_profile = profile.map(str::to_string);
    ContentHandlerBinding::new(
        config,
        ContentHandler::new(label).with_before(Arc::new(Probe {
            label: label.to_string(),
            log: log.clone(),
        })),
    )
}

#[test]
fn should_produce_one_builder_per_base_profile_under_concurrent_callers() {
    let factory = Arc::new(EngineRuntimeFactory::new());
    let profiles = ProfileSet::new("mobile", ["webkit"]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let factory = Arc::clone(&factory);
        let profiles = profiles.clone();
        handles.push(thread::spawn(move || factory.builder(Some(&profiles))));
    }
    let builders: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for builder in &builders[1..] {
        assert!(Arc::ptr_eq(&builders[0], builder));
    }
    assert_eq!(builders[0].base_profile(), "mobile");
}

#[test]
fn should_share_delivery_config_between_runtimes_with_same_key() {
    let factory = EngineRuntimeFactory::new();
    let log = Log::default();
    let bindings = vec![probe_binding("order", "A", None, &log)];

    let first = factory.create(None, &bindings).unwrap();
    let second = factory.create(None, &bindings).unwrap();
    assert!(std::ptr::eq(first.delivery(), second.delivery()));
    assert!(Arc::ptr_eq(first.reader_pool(), second.reader_pool()));
}

#[test]
fn should_filter_only_profile_targeted_bindings() {
    let factory = EngineRuntimeFactory::new();
    let log = Log::default();
    let bindings = vec![
        probe_binding("order", "mobile-visitor", Some("mobile"), &log),
        probe_binding("order", "desktop-visitor", Some("desktop"), &log),
        probe_binding("order", "everywhere", None, &log),
    ];

    let profiles = ProfileSet::new("mobile", ["webkit"]);
    let runtime = factory.create(Some(&profiles), &bindings).unwrap();
    runtime.filter("<order/>", "doc.xml").unwrap();

    assert_eq!(
        log.0.lock().unwrap().clone(),
        vec!["mobile-visitor:order", "everywhere:order"]
    );
}

#[test]
fn should_time_out_when_pool_is_exhausted() {
    let pool = ReaderPool::new(1, Duration::from_millis(50));
    let held = pool.acquire().unwrap();

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, FilterError::ReaderAcquisitionTimeout { .. }));
    drop(held);

    // The released reader is available again.
    assert!(pool.acquire().is_ok());
}

#[test]
fn should_block_until_a_reader_is_released() {
    let pool = ReaderPool::new(1, Duration::from_secs(5));
    let held = pool.acquire().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            drop(held);
        });
        assert!(pool.acquire().is_ok());
    });
}

#[test]
fn should_replace_discarded_readers() {
    let pool = ReaderPool::new(1, Duration::from_millis(50));
    let mut guard = pool.acquire().unwrap();
    guard.discard();
    drop(guard);

    // The discarded slot is recreated on the next acquire.
    assert!(pool.acquire().is_ok());
}

#[test]
fn should_reuse_pooled_readers_across_filter_runs() {
    let factory = EngineRuntimeFactory::new().with_pool(1, Duration::from_millis(200));
    let log = Log::default();
    let bindings = vec![probe_binding("order", "A", None, &log)];
    let runtime = factory.create(None, &bindings).unwrap();

    runtime.filter("<order/>", "one.xml").unwrap();
    runtime.filter("<order/>", "two.xml").unwrap();
    assert_eq!(log.0.lock().unwrap().len(), 2);
}

#[test]
fn should_surface_malformed_documents_through_runtime() {
    let factory = EngineRuntimeFactory::new();
    let log = Log::default();
    let bindings = vec![probe_binding("order", "A", None, &log)];
    let runtime = factory.create(None, &bindings).unwrap();

    let err = runtime.filter("<order><unclosed></order>", "doc.xml").unwrap_err();
    assert!(matches!(err, FilterError::MalformedDocument { .. }));
    // The pool still serves readers afterwards.
    runtime.filter("<order/>", "doc.xml").unwrap();
}
