use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vigil::{
    ApproverKind, Capabilities, FieldRegistry, MapEvent, Opts, RuleDefinition, RuleSet,
    RuleSetBuilder, ValueKind,
};

fn opts() -> Opts {
    Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int)
            .field("open.mode", ValueKind::Int),
    )
}

/// `n` rules on the "open" event type, each watching a different file.
fn definitions(n: usize) -> Vec<RuleDefinition> {
    (0..n)
        .map(|i| {
            RuleDefinition::new(
                &format!("r{i}"),
                &format!(
                    r#"open.filename in ["/etc/f{i}", "/var/f{i}"] && (open.flags > 0 || open.mode == {i})"#
                ),
            )
        })
        .collect()
}

fn build_ruleset(n: usize) -> RuleSet {
    RuleSetBuilder::new(opts())
        .rules(definitions(n))
        .compile()
        .unwrap()
}

fn event(filename: &str) -> MapEvent {
    MapEvent::new("open")
        .set("open.filename", filename)
        .set("open.flags", 1_i64)
        .set("open.mode", 0_i64)
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_eval");

    for &n in &[5, 20, 50] {
        let ruleset = build_ruleset(n);
        let hit = event("/etc/f0");
        group.bench_function(&format!("{n}_rules_match"), |b| {
            b.iter(|| ruleset.evaluate(black_box(&hit)));
        });

        // First evaluation learns the discarder; later ones skip every rule.
        let ruleset = build_ruleset(n);
        let miss = event("/tmp/x");
        ruleset.evaluate(&miss);
        group.bench_function(&format!("{n}_rules_discarded"), |b| {
            b.iter(|| ruleset.evaluate(black_box(&miss)));
        });

        let ruleset = build_ruleset(n);
        group.bench_function(&format!("{n}_rules_detailed"), |b| {
            b.iter(|| ruleset.evaluate_detailed(black_box(&hit)));
        });
    }

    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    for &n in &[5, 20, 50] {
        group.bench_function(&format!("{n}_rules"), |b| {
            b.iter(|| black_box(build_ruleset(n)));
        });
    }

    group.finish();
}

fn bench_approvers(c: &mut Criterion) {
    let mut group = c.benchmark_group("approvers");
    let capabilities = Capabilities::new()
        .field("open.filename", [ApproverKind::Exact, ApproverKind::Prefix])
        .field("open.flags", [ApproverKind::Range])
        .field("open.mode", [ApproverKind::Exact]);

    for &n in &[5, 20, 50] {
        let ruleset = build_ruleset(n);
        group.bench_function(&format!("{n}_rules"), |b| {
            b.iter(|| black_box(ruleset.approvers(&capabilities)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_compilation, bench_approvers);
criterion_main!(benches);
