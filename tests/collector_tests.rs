use pretty_assertions::assert_eq;
use request_debugbar::collector::{
    channel, Aggregator, EnvironmentInfo, EventBus, LifecycleEvent, LifecycleObserver, LogLevel,
    ManualProbe, ProcessContext, RequestInfo, StaticRequestData,
};
use request_debugbar::utils::config::{DebugBarOptions, MIB};
use serde_json::{json, Map, Value};

fn start(probe: &ManualProbe, context: &ProcessContext) -> Aggregator {
    Aggregator::builder(DebugBarOptions::default())
        .probe(probe.clone())
        .process_context(context.clone())
        .begin()
}

#[test]
fn test_timer_measures_elapsed_time() {
    let probe = ManualProbe::new(1_700_000_000.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    agg.start_timer("load_users");
    probe.advance_ms(50.0);
    let seconds = agg.stop_timer("load_users");

    assert!((seconds - 0.05).abs() < 1e-6);

    let report = agg.finalize();
    let timer = report.timers.iter().find(|t| t.name == "load_users").unwrap();
    assert_eq!(timer.duration, Some(50.0));
    assert_eq!(timer.start_time, 0.0);
    assert_eq!(timer.end_time, Some(50.0));
}

#[test]
fn test_duplicate_queries_grouped_after_normalization() {
    let probe = ManualProbe::new(0.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    agg.record_query("SELECT 1", vec![], 10.0, None);
    agg.record_query("SELECT   1", vec![], 10.0, None);
    agg.record_query("UPDATE users SET seen = 1", vec![], 2.0, None);
    probe.advance_ms(100.0);

    let report = agg.finalize();
    let db = &report.database;

    assert_eq!(db.query_count, 3);
    assert_eq!(db.total_time, 22.0);
    assert_eq!(db.duplicate_queries.len(), 1);
    assert_eq!(db.duplicate_queries[0].query, "SELECT 1");
    assert_eq!(db.duplicate_queries[0].executions, 2);
    assert_eq!(db.duplicate_queries[0].total_time, 20.0);

    let types: Vec<_> = db.query_types.iter().map(|t| (t.query_type.as_str(), t.count)).collect();
    assert!(types.contains(&("SELECT", 2)));
    assert!(types.contains(&("UPDATE", 1)));
}

#[test]
fn test_threshold_fires_once_per_process() {
    let context = ProcessContext::new();

    let first_probe = ManualProbe::new(0.0, 10 * MIB);
    let mut first = start(&first_probe, &context);
    first_probe.set_memory(16 * MIB);
    first.capture_memory("grown");

    let second_probe = ManualProbe::new(0.0, 10 * MIB);
    let mut second = start(&second_probe, &context);
    second_probe.set_memory(16 * MIB);
    second.capture_memory("grown");

    let crossed = |agg: &Aggregator| {
        agg.memory_snapshots()
            .iter()
            .filter(|s| s.key.starts_with("threshold_"))
            .map(|s| s.label.clone())
            .collect::<Vec<_>>()
    };

    assert_eq!(crossed(&first), vec!["Memory Threshold: 5MB Used".to_string()]);
    assert!(crossed(&second).is_empty());
    assert_eq!(context.thresholds().crossed(), vec!["threshold_5mb".to_string()]);

    let warnings = first.logs().group("Memory").unwrap();
    assert_eq!(warnings.entries[0].message, "Memory threshold crossed: 5MB");
}

#[test]
fn test_report_is_repeatable() {
    let probe = ManualProbe::new(0.0, 2 * MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    agg.on_event(&LifecycleEvent::Booting);
    probe.advance_ms(5.0);
    agg.on_event(&LifecycleEvent::Booted);
    agg.record_query("SELECT * FROM posts", vec![json!(1)], 3.0, None);
    probe.advance_ms(20.0);

    let first = agg.finalize();
    probe.advance_ms(100.0);
    probe.set_memory(8 * MIB);
    let second = agg.finalize();

    assert_eq!(first.performance, second.performance);
    assert_eq!(first.database, second.database);
    assert_eq!(first.memory, second.memory);
    assert_eq!(first.timers, second.timers);
    assert_eq!(first.timeline, second.timeline);
    assert_eq!(agg.queries().len(), 1);
}

#[test]
fn test_json_object_response_gets_snapshot() {
    let probe = ManualProbe::new(0.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());
    probe.advance_ms(12.0);

    let output = agg.terminate(r#"{"data": {"id": 1}}"#);
    let body: Value = serde_json::from_str(&output).unwrap();

    assert_eq!(body["data"], json!({"id": 1}));
    assert_eq!(body["__debug_bar"]["execution_time"], "12ms");
    assert_eq!(body["__debug_bar"]["database"]["query_count"], 0);
}

#[test]
fn test_non_object_json_left_untouched() {
    let probe = ManualProbe::new(0.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    assert_eq!(agg.terminate("[1,2,3]"), "[1,2,3]");
}

#[test]
fn test_html_response_gets_panel() {
    let probe = ManualProbe::new(0.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    let html = "<html><body>Hello</body></html>";
    let output = agg.terminate(html);

    assert!(output.starts_with(html));
    assert!(output.contains("<div id=\"debugbar\">"));
}

#[test]
fn test_panel_disabled_by_option() {
    let mut options = DebugBarOptions::default();
    options.show_inline_panel = false;
    let mut agg = Aggregator::builder(options)
        .probe(ManualProbe::new(0.0, MIB))
        .process_context(ProcessContext::new())
        .begin();

    assert_eq!(agg.terminate("plain text"), "plain text");
}

#[test]
fn test_event_bus_drives_aggregator() {
    let probe = ManualProbe::new(0.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    {
        let mut bus = EventBus::new();
        bus.subscribe(&mut agg);

        bus.publish(&LifecycleEvent::Booting);
        probe.advance_ms(4.0);
        bus.publish(&LifecycleEvent::Booted);
        bus.publish_named(channel::ROUTE_MATCHED, &json!({"uri": "/posts", "handler": "PostController"}));
        bus.publish_named(channel::MIDDLEWARE_PROCESSED, &json!(["web", "auth"]));
        bus.publish_named(channel::QUERY_EXECUTED, &json!({"query": "SELECT 1", "time": "1.5"}));
        bus.publish_named(channel::VIEW_RENDERED, &json!({"path": "posts/index", "time": 2}));
        bus.publish_named(channel::LANGUAGE_FILE_LOADED, &json!({"file": "en/messages", "load_time": 0.4}));
        probe.advance_ms(6.0);
        bus.publish(&LifecycleEvent::RouteDispatched);
        bus.publish_named("cache.hit", &json!({}));
    }

    assert_eq!(agg.queries()[0].time, 1.5);
    assert_eq!(agg.renders()[0].template, "posts/index");
    assert_eq!(agg.language_files()[0].file, "en/messages");
    assert_eq!(agg.middlewares().to_vec(), vec!["web".to_string(), "auth".to_string()]);
    assert_eq!(agg.route()["uri"], "/posts");

    let report = agg.finalize();
    assert!(report.request.route.get("handler").is_none());
    assert_eq!(report.views.rendered_count, 1);
    assert_eq!(report.translations.loaded_files_count, 1);
    assert!(agg.logs().ungrouped().is_empty());
}

#[test]
fn test_timeline_sorted_by_start() {
    let probe = ManualProbe::new(0.0, MIB);
    let mut agg = start(&probe, &ProcessContext::new());

    agg.start_timer("work");
    probe.advance_ms(5.0);
    agg.record_query("SELECT 1", vec![], 1.0, None);
    probe.advance_ms(5.0);
    agg.log("checkpoint", Map::new(), LogLevel::Info, Some("App"));
    probe.advance_ms(5.0);
    agg.stop_timer("work");

    let timeline = agg.finalize().timeline;
    let starts: Vec<f64> = timeline.iter().map(|e| e.start).collect();

    let mut sorted = starts.clone();
    sorted.sort_by(f64::total_cmp);
    assert_eq!(starts, sorted);
    assert_eq!(timeline[0].name, "Work");
    assert_eq!(timeline[0].duration, 15.0);
}

#[test]
fn test_request_input_is_redacted() {
    let mut request = RequestInfo {
        method: "POST".to_string(),
        uri: "/login".to_string(),
        ..Default::default()
    };
    request.post.insert("email".to_string(), json!("a@example.com"));
    request.post.insert("password".to_string(), json!("hunter2"));
    request.headers.insert("Authorization".to_string(), json!("Bearer abc"));
    request.session.insert("cart".to_string(), json!({"items": [{"api_token": "t"}]}));

    let mut agg = Aggregator::builder(DebugBarOptions::default())
        .probe(ManualProbe::new(0.0, MIB))
        .process_context(ProcessContext::new())
        .request_data(StaticRequestData::new(request, EnvironmentInfo::default()))
        .begin();

    let report = agg.finalize();

    assert_eq!(report.request.method, "POST");
    assert_eq!(report.request.post["email"], "a@example.com");
    assert_eq!(report.request.post["password"], "[HIDDEN]");
    assert_eq!(report.request.headers["Authorization"], "[HIDDEN]");
    assert_eq!(report.request.session["cart"]["items"][0]["api_token"], "[HIDDEN]");
}
