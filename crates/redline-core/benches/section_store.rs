use criterion::{black_box, criterion_group, criterion_main, Criterion};
use redline_core::section::{find_section, insert_section, replace_section, sections};

fn synthetic_article(section_count: usize) -> String {
    let mut md = String::from("# Synthetic Guide\n\nLead paragraph.\n\n");
    for i in 0..section_count {
        md.push_str(&format!("## Section {:03}\n\n", i));
        for p in 0..4 {
            md.push_str(&format!(
                "Paragraph {} of section {} explains a mechanic in some detail.\n\n",
                p, i
            ));
        }
    }
    md.push_str("## Sources\n\n- https://example.com/a\n- https://example.com/b\n");
    md
}

fn bench_find(c: &mut Criterion) {
    let md = synthetic_article(60);
    c.bench_function("find_section_exact_last", |b| {
        b.iter(|| black_box(find_section(black_box(&md), "Section 059")))
    });
    c.bench_function("find_section_normalized", |b| {
        b.iter(|| black_box(find_section(black_box(&md), "section   059")))
    });
}

fn bench_rewrite(c: &mut Criterion) {
    let md = synthetic_article(60);
    c.bench_function("replace_section_middle", |b| {
        b.iter(|| black_box(replace_section(black_box(&md), "Section 030", "Rewritten body.")))
    });
    c.bench_function("insert_section_before_sources", |b| {
        b.iter(|| black_box(insert_section(black_box(&md), None, "Extra", "New body.")))
    });
    c.bench_function("parse_sections", |b| {
        b.iter(|| black_box(sections(black_box(&md)).len()))
    });
}

criterion_group!(benches, bench_find, bench_rewrite);
criterion_main!(benches);
