use commit2mod::{
    classify_hunk, parse_hunks, passage_patches_from_diff, resolve_passage, ContextMode,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indoc::indoc;

// --- Parsing Benchmarks ---

fn parsing_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");

    // Simple, single-hunk diff
    let simple_diff = indoc! {"
        diff --git a/scenes/town.twee b/scenes/town.twee
        --- a/scenes/town.twee
        +++ b/scenes/town.twee
        @@ -2,2 +2,3 @@
         Alice said hello.
        +Bob waved back.
         The sun set.
    "};
    group.bench_function("simple_diff", |b| {
        b.iter(|| parse_hunks(black_box(simple_diff)).unwrap())
    });

    // Diff with many hunks for a single file
    let mut large_diff = String::new();
    for i in 0..100 {
        large_diff.push_str(&format!(
            "@@ -{},3 +{},3 @@\n context line {}\n-old line {}\n+new line {}\n",
            i * 5 + 1,
            i * 5 + 1,
            i,
            i,
            i
        ));
    }
    group.bench_function("large_diff_100_hunks", |b| {
        b.iter(|| parse_hunks(black_box(&large_diff)).unwrap())
    });

    group.finish();
}

// --- Extraction Benchmarks ---

fn extraction_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Extraction");

    // Classify + synthesize a single wide hunk.
    let mut wide_hunk = String::from("@@ -1,60 +1,60 @@\n");
    for i in 0..40 {
        wide_hunk.push_str(&format!(" context {}\n", i));
    }
    for i in 0..10 {
        wide_hunk.push_str(&format!("-removed {}\n", i));
    }
    for i in 0..10 {
        wide_hunk.push_str(&format!("+added {}\n", i));
    }
    let hunks = parse_hunks(&wide_hunk).unwrap();
    group.bench_function("classify_and_synthesize_wide_hunk", |b| {
        b.iter(|| {
            let classified = classify_hunk(black_box(&hunks[0]), ContextMode::Passage);
            black_box(classified.replacement())
        })
    });

    // Backward passage resolution over a large file.
    let mut content_lines: Vec<String> = Vec::new();
    for p in 0..50 {
        content_lines.push(format!(":: Passage {}", p));
        for l in 0..100 {
            content_lines.push(format!("line {} of passage {}", l, p));
        }
    }
    let target = content_lines.len() - 1;
    group.bench_function("resolve_passage_large_file", |b| {
        b.iter(|| resolve_passage(black_box(&content_lines), black_box(target)))
    });

    // Whole-file pipeline: many hunks against a large content snapshot.
    let content = content_lines.join("\n");
    let mut many_hunks = String::new();
    for i in 0..50 {
        let start = i * 101 + 2;
        many_hunks.push_str(&format!(
            "@@ -{},3 +{},3 @@\n line {} of passage {}\n-line {} of passage {}\n+rewritten {}\n",
            start,
            start,
            0,
            i,
            1,
            i,
            i
        ));
    }
    group.bench_function("passage_pipeline_50_hunks", |b| {
        b.iter(|| passage_patches_from_diff(black_box(&many_hunks), black_box(&content)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, parsing_benches, extraction_benches);
criterion_main!(benches);
