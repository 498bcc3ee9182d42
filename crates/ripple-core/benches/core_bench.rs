//! Criterion benchmarks for ripple-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration overhead.
//! 2. **extraction**: Single-file parse + facet extraction per language.
//! 3. **parse_sources**: Parallel batch parsing across worker counts.
//! 4. **dependency_graph**: Edge resolution and merging on synthetic projects.
//! 5. **impact**: Export diffing, propagation and text diffs.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/ripple-core/Cargo.toml
//! # Only the graph group:
//! cargo bench --manifest-path crates/ripple-core/Cargo.toml -- dependency_graph
//! ```

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

use ripple_core::impact::diff::generate_diff;
use ripple_core::impact::propagator::{changed_exports, find_affected_components};
use ripple_core::indexer::dependencies::{build_dependency_graph, ExportIndex, IndexedFile};
use ripple_core::indexer::parser::ParserRegistry;
use ripple_core::indexer::pipeline::{parse_sources, SourceFile};
use ripple_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `components` directories of `files_per_component` TypeScript files each.
/// File `i` of component `k` imports its namesake in component `k - 1` and
/// calls the imported function twice.
fn synthetic_project(components: usize, files_per_component: usize) -> Vec<(String, SourceFile)> {
    let mut out = Vec::with_capacity(components * files_per_component);
    for k in 0..components {
        for i in 0..files_per_component {
            let path = format!("c{k}/mod_{i}.ts");
            let mut body = String::new();
            if k > 0 {
                body.push_str(&format!(
                    "import {{ fn_{p}_{i} }} from '../c{p}/mod_{i}';\n",
                    p = k - 1
                ));
                body.push_str("import lodash from 'lodash';\n");
            }
            body.push_str(&format!(
                "export function fn_{k}_{i}(a: number, b: string): number {{\n"
            ));
            if k > 0 {
                body.push_str(&format!("  fn_{p}_{i}(a, b);\n  fn_{p}_{i}(a + 1, b);\n", p = k - 1));
            }
            body.push_str("  return a;\n}\n");
            body.push_str(&format!("export class Service{k}_{i} {{\n  run(): void {{}}\n}}\n"));
            body.push_str(&format!("export const LIMIT_{k}_{i} = {i};\n"));
            out.push((format!("c{k}"), SourceFile::new(path, body)));
        }
    }
    out
}

fn index_project(
    registry: &ParserRegistry,
    project: &[(String, SourceFile)],
) -> Vec<IndexedFile> {
    project
        .iter()
        .filter_map(|(component, file)| {
            let outcome = registry.parse_file(&file.path, &file.content).ok()??;
            Some(IndexedFile::new(Some(component.as_str()), outcome.parsed))
        })
        .collect()
}

const SAMPLES: &[(&str, &str)] = &[
    (
        "app.ts",
        "import { helper } from './utils';\nexport interface Opts { depth: number }\n\
         export function run(o: Opts): number { return helper(o.depth); }\n",
    ),
    (
        "app.py",
        "from .utils import helper\nimport os\n\nclass Runner:\n    def run(self, depth: int) -> int:\n\
         \x20       return helper(depth)\n\ndef main():\n    Runner().run(2)\n",
    ),
    (
        "app.go",
        "package app\n\nimport \"example.com/utils\"\n\nfunc Run(depth int) int {\n\
         \treturn utils.Helper(depth)\n}\n",
    ),
    (
        "app.rs",
        "use crate::utils::helper;\n\npub struct Runner;\n\nimpl Runner {\n\
         \x20   pub fn run(&self, depth: u32) -> u32 { helper(depth) }\n}\n",
    ),
    (
        "App.java",
        "package app;\n\nimport utils.Helper;\n\npublic class App {\n\
         \x20   public int run(int depth) { return Helper.help(depth); }\n}\n",
    ),
];

// ---------------------------------------------------------------------------
// 1. schema
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

// ---------------------------------------------------------------------------
// 2. extraction
// ---------------------------------------------------------------------------

fn bench_extraction(c: &mut Criterion) {
    let registry = ParserRegistry::new();
    let mut group = c.benchmark_group("extraction");
    for (path, source) in SAMPLES {
        // Warm the grammar cache and parser pool outside the measurement.
        registry.parse_file(path, source.as_bytes()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(path), source, |b, source| {
            b.iter(|| black_box(registry.parse_file(path, source.as_bytes()).unwrap()));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. parse_sources
// ---------------------------------------------------------------------------

fn bench_parse_sources(c: &mut Criterion) {
    let registry = ParserRegistry::new();
    let files: Vec<SourceFile> = synthetic_project(8, 25)
        .into_iter()
        .map(|(_, file)| file)
        .collect();
    let mut group = c.benchmark_group("parse_sources");
    group.sample_size(20);
    for &workers in &[1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &w| {
            b.iter(|| black_box(parse_sources(&registry, &files, w)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 4. dependency_graph
// ---------------------------------------------------------------------------

fn bench_dependency_graph(c: &mut Criterion) {
    let registry = ParserRegistry::new();
    let mut group = c.benchmark_group("dependency_graph");
    for &(components, per) in &[(4usize, 10usize), (10, 25), (20, 50)] {
        let indexed = index_project(&registry, &synthetic_project(components, per));
        group.bench_with_input(
            BenchmarkId::new("build", components * per),
            &indexed,
            |b, indexed| {
                b.iter_with_setup(
                    || indexed.clone(),
                    |files| black_box(build_dependency_graph(files)),
                );
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 5. impact
// ---------------------------------------------------------------------------

fn bench_impact(c: &mut Criterion) {
    let registry = ParserRegistry::new();
    let mut group = c.benchmark_group("impact");

    let committed = "export function helper(a: number) { return a; }\n\
                     export function other() {}\nexport const LIMIT = 3;\n";
    let drafted = "export function helper(a: number, b: number) { return a + b; }\n\
                   export const LIMIT = 3;\nexport class Added {}\n";
    let before = registry
        .parse_file("c0/utils.ts", committed.as_bytes())
        .unwrap()
        .unwrap()
        .parsed;
    let after = registry
        .parse_file("c0/utils.ts", drafted.as_bytes())
        .unwrap()
        .unwrap()
        .parsed;
    group.bench_function("changed_exports", |b| {
        b.iter(|| black_box(changed_exports(Some(&before), &after)));
    });

    group.bench_function("text_diff", |b| {
        b.iter(|| black_box(generate_diff(committed, drafted)));
    });

    let indexed = index_project(&registry, &synthetic_project(10, 25));
    let graph = build_dependency_graph(indexed.clone());
    let index = ExportIndex::build(indexed);
    let edges_into: Vec<_> = graph
        .edges
        .iter()
        .filter(|e| e.target_component_id == "c4")
        .cloned()
        .collect();
    let changed: BTreeSet<String> = (0..25).step_by(3).map(|i| format!("fn_4_{i}")).collect();
    group.bench_function("find_affected_components", |b| {
        b.iter(|| black_box(find_affected_components("c4", &changed, true, &edges_into, &index)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_schema_init,
    bench_extraction,
    bench_parse_sources,
    bench_dependency_graph,
    bench_impact,
);
criterion_main!(benches);
