use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scrivener_core::TokenCounter;
use scrivener_core::research::assembler::compile;
use scrivener_core::research::plan::parse_plan;
use scrivener_core::research::sources::{SourcePreparer, format_sources};
use scrivener_core::research::structured::normalize_queries;
use scrivener_core::research::{PlannedSection, Section, SectionStatus, Source};
use scrivener_core::SearchDocument;

fn sources(n: usize) -> Vec<Source> {
    (0..n)
        .map(|i| Source {
            title: format!("Source {i}"),
            url: format!("https://example.com/{i}"),
            snippet: "A short summary of the page.".into(),
            content: Some("Body text. ".repeat(200)),
            truncated: false,
            query: "tokio scheduler".into(),
            iteration: 1,
        })
        .collect()
}

fn bench_sources(c: &mut Criterion) {
    let batch = sources(20);
    c.bench_function("format_sources_20", |b| {
        b.iter(|| format_sources(black_box(&batch)))
    });

    let preparer = SourcePreparer::new("gpt-4.1-mini", 1000);
    let long_body = "tokens and more tokens ".repeat(2000);
    c.bench_function("prepare_truncates_long_document", |b| {
        b.iter(|| {
            let doc = SearchDocument::new("Long", "https://example.com/long", "snippet")
                .with_content(long_body.clone());
            preparer.prepare(black_box(vec![doc]), "query", 1)
        })
    });

    let counter = TokenCounter::for_model("gpt-4.1-mini");
    let text = "The quick brown fox jumps over the lazy dog. ".repeat(100);
    c.bench_function("token_count_4k_chars", |b| {
        b.iter(|| counter.count(black_box(&text)))
    });
}

fn bench_structured_output(c: &mut Criterion) {
    let queries: Vec<String> = (0..50)
        .map(|i| format!("  Query {}  ", i % 17))
        .collect();
    c.bench_function("normalize_queries_50", |b| {
        b.iter(|| normalize_queries(black_box(queries.clone()), 5))
    });

    let plan = r#"```json
{"sections": [
    {"name": "Introduction", "description": "Overview", "research": false},
    {"name": "Scheduler", "description": "Work stealing", "research": true},
    {"name": "IO Driver", "description": "Reactor", "research": true},
    {"name": "Timers", "description": "Hierarchical wheel", "research": true},
    {"name": "Conclusion", "description": "Summary", "research": false}
]}
```"#;
    c.bench_function("parse_plan_5_sections", |b| {
        b.iter(|| parse_plan(black_box(plan)))
    });
}

fn bench_compile(c: &mut Criterion) {
    let sections: Vec<Section> = (0..10)
        .map(|i| {
            let mut s = Section::from_planned(&PlannedSection {
                ordinal: i,
                name: format!("Section {i}"),
                description: String::new(),
                research: true,
            });
            s.status = SectionStatus::Complete;
            s.draft = Some("Paragraph of findings. ".repeat(100));
            s.sources = sources(5);
            s
        })
        .collect();
    c.bench_function("compile_10_sections", |b| {
        b.iter(|| compile(black_box("Tokio"), black_box(&sections)))
    });
}

criterion_group!(benches, bench_sources, bench_structured_output, bench_compile);
criterion_main!(benches);
