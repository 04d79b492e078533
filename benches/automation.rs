//! Rule-matching benchmarks.
//!
//! Run with: cargo bench --bench automation

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use solarcrm::automation::{render, AutomationRule};
use solarcrm::db::SqlDialect;
use solarcrm::query::{matches, StructuredCompiler};
use solarcrm::types::{ChangeOperation, StructuredFilter};

fn sample_filter() -> StructuredFilter {
  serde_json::from_value(json!({
    "$and": [
      {"status": {"$in": ["open", "won"]}},
      {"funnel.stage": {"$ne": "lost"}},
      {"$or": [
        {"value": {"$gte": 20000}},
        {"name": {"$contains": "kwp"}}
      ]}
    ]
  }))
  .unwrap()
}

fn sample_record() -> serde_json::Value {
  json!({
    "_id": "5d1c3f6e-8a43-4f0c-9a8e-1f2b3c4d5e6f",
    "idParceiro": "p1",
    "name": "Roof 8kWp",
    "status": "open",
    "value": 48000,
    "funnel": {"stage": "qualified"},
    "responsibles": [{"id": "u1", "name": "Bia"}]
  })
}

fn bench_condition(c: &mut Criterion) {
  let mut group = c.benchmark_group("condition");
  let filter = sample_filter();
  let record = sample_record();

  group.bench_function("match_in_memory", |b| {
    b.iter(|| black_box(matches(black_box(&filter), black_box(&record))));
  });

  for (label, dialect) in [("compile_sqlite", SqlDialect::Sqlite), ("compile_postgres", SqlDialect::Postgres)] {
    let compiler = StructuredCompiler::new(dialect);
    group.bench_function(label, |b| {
      b.iter(|| black_box(compiler.filter_to_sql(black_box(&filter)).unwrap()));
    });
  }
  group.finish();
}

fn bench_rule(c: &mut Criterion) {
  let mut group = c.benchmark_group("rule");
  let raw = json!({
    "title": "Won",
    "trigger": {"entity": "opportunities", "event": {"type": "fieldChanged", "field": "status", "to": "won"}},
    "condition": {"value": {"$gte": 10000}},
    "action": {"type": "createNotification", "message": "{{name}} won by {{responsibles.0.name}}", "recipients": "responsibles"}
  });

  group.bench_function("parse", |b| {
    b.iter(|| black_box(serde_json::from_value::<AutomationRule>(raw.clone()).unwrap()));
  });

  let rule: AutomationRule = serde_json::from_value(raw).unwrap();
  let before = sample_record();
  let mut after = sample_record();
  after["status"] = json!("won");

  group.bench_function("fires", |b| {
    b.iter(|| {
      black_box(rule.trigger.event.fires(
        ChangeOperation::Update,
        Some(black_box(&before)),
        Some(black_box(&after)),
      ))
    });
  });

  group.bench_function("render_template", |b| {
    b.iter(|| black_box(render("{{name}} won by {{responsibles.0.name}}", black_box(&after))));
  });
  group.finish();
}

criterion_group!(benches, bench_condition, bench_rule);
criterion_main!(benches);
