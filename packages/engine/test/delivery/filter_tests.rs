use cdrl_engine::delivery::ElementView;
use cdrl_engine::{
    AfterVisitor, BeforeVisitor, ChildrenVisitor, ContentHandler, ContentHandlerBinding,
    DispatchPlanner, ExecutionContext, Filter, FilterError, ResourceConfig, SelectorPathParser,
    VisitResult, XmlReader,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct Probe {
    label: String,
    log: Log,
}

impl Probe {
    fn new(label: &str, log: &Log) -> Arc<Self> {
        Arc::new(Probe {
            label: label.to_string(),
            log: log.clone(),
        })
    }

    fn describe(&self, element: &ElementView) -> String {
        element
            .attr("id")
            .map(str::to_string)
            .unwrap_or_else(|| element.local.clone())
    }
}

impl BeforeVisitor for Probe {
    fn visit_before(&self, element: &ElementView, _c: &mut ExecutionContext) -> VisitResult {
        self.log.push(format!("before:{}:{}", self.label, self.describe(element)));
        Ok(())
    }
}

impl ChildrenVisitor for Probe {
    fn visit_child_text(&self, text: &str, _c: &mut ExecutionContext) -> VisitResult {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.log.push(format!("text:{}:{}", self.label, trimmed));
        }
        Ok(())
    }

    fn visit_child_element(&self, child: &ElementView, _c: &mut ExecutionContext) -> VisitResult {
        self.log.push(format!("child:{}:{}", self.label, child.local));
        Ok(())
    }
}

impl AfterVisitor for Probe {
    fn visit_after(&self, element: &ElementView, _c: &mut ExecutionContext) -> VisitResult {
        self.log.push(format!("after:{}:{}", self.label, self.describe(element)));
        Ok(())
    }
}

fn config(selector: &str) -> ResourceConfig {
    ResourceConfig::for_selector(selector).unwrap()
}

fn run(bindings: Vec<ContentHandlerBinding>, document: &str) -> Result<(), FilterError> {
    run_with(bindings, document, |_| {})
}

fn run_with<F>(
    bindings: Vec<ContentHandlerBinding>,
    document: &str,
    prepare: F,
) -> Result<(), FilterError>
where
    F: FnOnce(&mut ExecutionContext),
{
    let delivery = DispatchPlanner::new().plan(&bindings).unwrap();
    let mut context = ExecutionContext::new(&delivery);
    prepare(&mut context);
    let mut reader = XmlReader::new();
    Filter::new(&delivery).filter(&mut reader, document, "doc.xml", &mut context)
}

#[test]
fn should_fire_before_in_document_order_and_after_in_reverse() {
    let log = Log::default();
    let bindings = vec![
        ContentHandlerBinding::new(
            config("a"),
            ContentHandler::new("A")
                .with_before(Probe::new("A", &log))
                .with_after(Probe::new("A", &log)),
        ),
        ContentHandlerBinding::new(
            config("a/b"),
            ContentHandler::new("B")
                .with_before(Probe::new("B", &log))
                .with_after(Probe::new("B", &log)),
        ),
    ];

    run(bindings, "<a><b/></a>").unwrap();
    assert_eq!(
        log.events(),
        vec!["before:A:a", "before:B:b", "after:B:b", "after:A:a"]
    );
}

#[test]
fn should_fire_position_predicate_on_second_child_of_each_parent() {
    let log = Log::default();
    let bindings = vec![ContentHandlerBinding::new(
        config("a/b[2]"),
        ContentHandler::new("SecondB").with_before(Probe::new("P", &log)),
    )];

    run(
        bindings,
        r#"<root>
             <a><b id="a1-b1"/><b id="a1-b2"/><b id="a1-b3"/></a>
             <a><b id="a2-b1"/><b id="a2-b2"/></a>
           </root>"#,
    )
    .unwrap();

    assert_eq!(log.events(), vec!["before:P:a1-b2", "before:P:a2-b2"]);
}

#[test]
fn should_count_positions_among_elements_passing_earlier_predicates() {
    let log = Log::default();
    // Predicates evaluate left to right: [2] counts only items that already
    // matched type='a'.
    let bindings = vec![ContentHandlerBinding::new(
        config("list/item[type='a'][2]"),
        ContentHandler::new("SecondTypeA").with_before(Probe::new("P", &log)),
    )];

    run(
        bindings,
        r#"<list>
             <item type="b" id="i1"/>
             <item type="a" id="i2"/>
             <item type="b" id="i3"/>
             <item type="a" id="i4"/>
           </list>"#,
    )
    .unwrap();

    assert_eq!(log.events(), vec!["before:P:i4"]);
}

#[test]
fn should_deliver_child_events_once_per_direct_child() {
    let log = Log::default();
    let bindings = vec![ContentHandlerBinding::new(
        config("a"),
        ContentHandler::new("A")
            .with_before(Probe::new("A", &log))
            .with_children(Probe::new("A", &log))
            .with_after(Probe::new("A", &log)),
    )];

    run(bindings, "<a>hi<b><c/></b>there</a>").unwrap();
    assert_eq!(
        log.events(),
        vec![
            "before:A:a",
            "text:A:hi",
            "child:A:b",
            "text:A:there",
            "after:A:a"
        ]
    );
}

#[test]
fn should_fire_after_without_before_registration() {
    let log = Log::default();
    let bindings = vec![ContentHandlerBinding::new(
        config("a/b"),
        ContentHandler::new("AfterOnly").with_after(Probe::new("P", &log)),
    )];

    run(bindings, "<a><b/></a>").unwrap();
    assert_eq!(log.events(), vec!["after:P:b"]);
}

#[test]
fn should_fire_wildcard_bucket_for_text_selector_after() {
    let log = Log::default();
    let bindings = vec![ContentHandlerBinding::new(
        config("a/b/text()"),
        ContentHandler::new("TextAfter").with_after(Probe::new("P", &log)),
    )];

    run(bindings, "<a><b>value</b><c/></a>").unwrap();
    // The wildcard bucket is consulted for every element end; only the
    // matching element fires.
    assert_eq!(log.events(), vec!["after:P:b"]);
}

#[test]
fn should_gate_visitors_on_conditions() {
    let log = Log::default();
    let mut gated = config("order");
    gated.condition = Some(
        cdrl_engine::ExpressionEvaluatorFactory::new()
            .create(None, "channel == 'web'")
            .unwrap(),
    );
    let bindings = vec![ContentHandlerBinding::new(
        gated,
        ContentHandler::new("Gated").with_before(Probe::new("P", &log)),
    )];

    run_with(bindings, "<order/>", |context| {
        context.eval_context_mut().set("channel", "batch");
    })
    .unwrap();
    assert!(log.events().is_empty());

    let log = Log::default();
    let mut gated = config("order");
    gated.condition = Some(
        cdrl_engine::ExpressionEvaluatorFactory::new()
            .create(None, "channel == 'web'")
            .unwrap(),
    );
    let bindings = vec![ContentHandlerBinding::new(
        gated,
        ContentHandler::new("Gated").with_before(Probe::new("P", &log)),
    )];
    run_with(bindings, "<order/>", |context| {
        context.eval_context_mut().set("channel", "web");
    })
    .unwrap();
    assert_eq!(log.events(), vec!["before:P:order"]);
}

#[test]
fn should_match_namespaced_selectors_against_document_namespaces() {
    let log = Log::default();
    let mut namespaces = HashMap::new();
    namespaces.insert("o".to_string(), "urn:orders".to_string());
    let path = SelectorPathParser::new().parse("o:order", &namespaces).unwrap();
    let bindings = vec![ContentHandlerBinding::new(
        ResourceConfig::new(path),
        ContentHandler::new("NS").with_before(Probe::new("P", &log)),
    )];

    run(
        bindings,
        r#"<root><order xmlns="urn:orders"/><order/></root>"#,
    )
    .unwrap();
    // Only the element in urn:orders matches.
    assert_eq!(log.events(), vec!["before:P:order"]);
}

struct Terminator;

impl BeforeVisitor for Terminator {
    fn visit_before(&self, _e: &ElementView, context: &mut ExecutionContext) -> VisitResult {
        context.termination().terminate();
        Ok(())
    }
}

#[test]
fn should_stop_all_callbacks_after_termination() {
    let log = Log::default();
    let bindings = vec![
        ContentHandlerBinding::new(
            config("a"),
            ContentHandler::new("Term").with_before(Arc::new(Terminator)),
        ),
        ContentHandlerBinding::new(
            config("a/b"),
            ContentHandler::new("Never")
                .with_before(Probe::new("N", &log))
                .with_after(Probe::new("N", &log)),
        ),
    ];

    let err = run(bindings, "<a><b/></a>").unwrap_err();
    assert!(matches!(err, FilterError::Terminated));
    assert!(log.events().is_empty());
}

struct Failing;

impl BeforeVisitor for Failing {
    fn visit_before(&self, _e: &ElementView, _c: &mut ExecutionContext) -> VisitResult {
        Err("broken visitor".into())
    }
}

#[test]
fn should_wrap_visitor_failures_with_selector_and_resource() {
    let bindings = vec![ContentHandlerBinding::new(
        config("order"),
        ContentHandler::new("com.acme.Broken").with_before(Arc::new(Failing)),
    )];

    let err = run(bindings, "<order/>").unwrap_err();
    match err {
        FilterError::Visitor {
            selector, resource, ..
        } => {
            assert_eq!(selector, "order");
            assert_eq!(resource, "com.acme.Broken");
        }
        other => panic!("expected Visitor error, got {:?}", other),
    }
}

#[test]
fn should_reject_malformed_documents() {
    let bindings = vec![ContentHandlerBinding::new(
        config("a"),
        ContentHandler::new("A").with_before(Probe::new("A", &Log::default())),
    )];

    let err = run(bindings, "<a><b></a>").unwrap_err();
    assert!(matches!(err, FilterError::MalformedDocument { .. }));
}
