use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion};
use vigil::{FieldRegistry, MapEvent, Opts, RuleDefinition, RuleSet, RuleSetBuilder, ValueKind};

fn build_shared_ruleset() -> (Arc<RuleSet>, Vec<MapEvent>) {
    let opts = Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int),
    );
    let n = 20;
    let rules = (0..n).map(|i| {
        RuleDefinition::new(
            &format!("r{i}"),
            &format!(r#"open.filename =~ "/etc/d{i}/*" && open.flags > 0"#),
        )
    });
    let ruleset = Arc::new(RuleSetBuilder::new(opts).rules(rules).compile().unwrap());

    // Mostly noise, as on a real host.
    let events = (0..64)
        .map(|i| {
            let filename = if i % 16 == 0 {
                format!("/etc/d{}/conf", i % n)
            } else {
                format!("/tmp/{}", i % 8)
            };
            MapEvent::new("open")
                .set("open.filename", filename)
                .set("open.flags", 1_i64)
        })
        .collect();

    (ruleset, events)
}

fn bench_throughput(c: &mut Criterion) {
    let thread_counts = [1, 2, 4, 8];

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &thread_counts {
        let (ruleset, events) = build_shared_ruleset();
        let events = Arc::new(events);

        group.bench_function(&format!("{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let per_thread = iters / threads as u64;
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let rs = Arc::clone(&ruleset);
                        let events = Arc::clone(&events);
                        thread::spawn(move || {
                            let start = Instant::now();
                            for i in 0..per_thread {
                                let _ = rs.evaluate(&events[i as usize % events.len()]);
                            }
                            start.elapsed()
                        })
                    })
                    .collect();

                let mut max_elapsed = Duration::ZERO;
                for h in handles {
                    let elapsed = h.join().unwrap();
                    if elapsed > max_elapsed {
                        max_elapsed = elapsed;
                    }
                }
                max_elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
