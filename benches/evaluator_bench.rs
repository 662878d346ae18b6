use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use shadeflow::document::Document;
use shadeflow::evaluator::Evaluator;
use shadeflow::marshal::Clock;
use shadeflow::resources::ResourceStore;

fn loop_sum_doc() -> Document {
    Document::from_json_str(
        r#"{
            "version": "1", "entryPoint": "main", "resources": [], "structs": [],
            "functions": [{
                "id": "main", "kind": "cpu", "inputs": [], "outputs": [{"name": "out", "type": "int"}],
                "localVars": [{"name": "acc", "type": "int", "initialValue": 0}],
                "nodes": [
                    {"id": "one", "op": "literal", "value": 1},
                    {"id": "loop", "op": "flow_loop", "tag": "i", "count": 1000, "exec_body": "add", "exec_completed": "ret"},
                    {"id": "cur", "op": "var_get", "name": "acc"},
                    {"id": "sum", "op": "math_add", "a": "cur", "b": "one"},
                    {"id": "add", "op": "var_set", "name": "acc", "value": "sum", "next": null},
                    {"id": "result", "op": "var_get", "name": "acc"},
                    {"id": "ret", "op": "func_return", "value": "result"}
                ]
            }]
        }"#,
    )
    .unwrap()
}

fn bench_evaluator_loop(c: &mut Criterion) {
    let doc = loop_sum_doc();
    let func = doc.function("main").unwrap();
    c.bench_function("evaluate 1000-iteration accumulate loop", |b| {
        b.iter(|| {
            let mut resources = ResourceStore::new();
            let clock = Clock::default();
            let mut evaluator = Evaluator::new(&doc, &mut resources, &clock);
            black_box(evaluator.call(func, &HashMap::new()).unwrap());
        });
    });
}

criterion_group!(benches, bench_evaluator_loop);
criterion_main!(benches);
