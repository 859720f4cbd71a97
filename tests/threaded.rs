use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use vigil::{
    Capabilities, Discarder, DiscarderCache, Engine, EngineConfig, Event, EventSink,
    FieldRegistry, Limit, MapEvent, Opts, Policy, PolicyProvider, Rule, RuleDefinition,
    RuleSetBuilder, ScalarValue, StaticProvider, ValueKind,
};

fn opts() -> Opts {
    Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int)
            .field("exec.filename", ValueKind::String),
    )
}

fn open(filename: &str) -> MapEvent {
    MapEvent::new("open")
        .set("open.filename", filename)
        .set("open.flags", 0_i64)
}

#[test]
fn evaluate_across_threads() {
    let ruleset = Arc::new(
        RuleSetBuilder::new(opts())
            .rule(RuleDefinition::new("shadow", r#"open.filename == "/etc/shadow""#))
            .rule(RuleDefinition::new("shell", r#"exec.filename in ["/bin/sh", "/bin/bash"]"#))
            .compile()
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let rs = Arc::clone(&ruleset);
            thread::spawn(move || {
                let mut matched = 0;
                for j in 0..500 {
                    let event = if (i + j) % 10 == 0 {
                        open("/etc/shadow")
                    } else {
                        open(&format!("/tmp/{}", j % 7))
                    };
                    if rs.evaluate(&event) {
                        matched += 1;
                    }
                }
                assert!(rs.evaluate(&MapEvent::new("exec").set("exec.filename", "/bin/sh")));
                matched
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 200);
    // One discarder per distinct /tmp value, however many threads found it.
    assert_eq!(ruleset.discarders().len(), 7);
}

#[derive(Default)]
struct CountingSink {
    sent: AtomicUsize,
}

impl EventSink for CountingSink {
    fn send(&self, _rule: &Rule, _event: &dyn Event) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_discarder(&self, _discarder: &Discarder) {}
}

#[test]
fn events_during_reload_never_miss_a_match() {
    let provider: Arc<dyn PolicyProvider> = Arc::new(StaticProvider::new("builtin").policy(
        Policy::new("default", "builtin").rule(RuleDefinition::new(
            "shadow",
            r#"open.filename == "/etc/shadow""#,
        )),
    ));
    let config = EngineConfig {
        default_rate_limit: Limit::new(u32::MAX, 0.0),
        ..EngineConfig::default()
    };
    let sink = Arc::new(CountingSink::default());
    let engine = Arc::new(Engine::new(
        config,
        opts(),
        Capabilities::new(),
        Arc::clone(&sink) as Arc<dyn EventSink>,
    ));
    engine.load_policies(vec![provider]);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut matched = 0;
                for j in 0..1000 {
                    engine.handle_event(&open(&format!("/tmp/{}", j % 5)));
                    if engine.handle_event(&open("/etc/shadow")) {
                        matched += 1;
                    }
                }
                matched
            })
        })
        .collect();

    let reloader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..20 {
                let report = engine.reload();
                assert_eq!(report.rules, 1);
            }
        })
    };

    reloader.join().unwrap();
    let total: usize = workers.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 4000);
    assert_eq!(sink.sent.load(Ordering::Relaxed), 4000);
}

#[test]
fn concurrent_cache_inserts() {
    let cache = Arc::new(DiscarderCache::new(64));
    let generation = cache.reset();

    let handles: Vec<_> = (0..8_i64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let mut inserted = 0;
                for i in 0..32_i64 {
                    let discarder = Discarder {
                        event_type: "open".into(),
                        field: "open.flags".into(),
                        value: ScalarValue::Int(i + (t % 4) * 8),
                    };
                    if cache.insert(generation, &discarder) {
                        inserted += 1;
                    }
                }
                inserted
            })
        })
        .collect();

    let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // Values 0..56 overlap across threads; each lands exactly once.
    assert_eq!(inserted, 56);
    assert_eq!(cache.len(), 56);

    let stale = Discarder {
        event_type: "open".into(),
        field: "open.flags".into(),
        value: ScalarValue::Int(1000),
    };
    cache.reset();
    assert!(!cache.insert(generation, &stale));
    assert!(cache.is_empty());
}
