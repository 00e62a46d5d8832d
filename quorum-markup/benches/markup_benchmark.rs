use criterion::{criterion_group, criterion_main, Criterion};
use quorum_markup::{to_markup_string, Element, Lexer, Registry};
use std::hint::black_box;

fn sample_tree(items: usize) -> Element {
    let mut root = Element::new("Script");
    for i in 0..items {
        root = root.with_child(
            Element::new("ChoiceQuestion")
                .with_attribute("style", "PAR_alpha")
                .with_text(format!("Question {i}: which of these is <correct> & why?"))
                .with_child(Element::new("Choice").with_text("first answer"))
                .with_child(Element::new("Choice").with_text(" padded answer "))
                .with_child(Element::new("Choice").with_text("multi\nline")),
        );
    }
    root
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    for name in ["Script", "ChoiceQuestion", "Choice"] {
        registry.register(name, move || Element::new(name));
    }
    registry
}

fn bench_lex_100_questions(c: &mut Criterion) {
    let text = to_markup_string(&sample_tree(100)).unwrap();

    c.bench_function("lex_100_questions", |b| {
        b.iter(|| {
            let count = Lexer::from_text(black_box(&text)).count();
            black_box(count);
        })
    });
}

fn bench_write_100_questions(c: &mut Criterion) {
    let tree = sample_tree(100);

    c.bench_function("write_100_questions", |b| {
        b.iter(|| {
            black_box(to_markup_string(black_box(&tree)).unwrap());
        })
    });
}

fn bench_parse_100_questions(c: &mut Criterion) {
    let registry = registry();
    let text = to_markup_string(&sample_tree(100)).unwrap();

    c.bench_function("parse_100_questions", |b| {
        b.iter(|| {
            black_box(registry.parse_str(black_box(&text)).unwrap());
        })
    });
}

fn bench_entity_heavy_text(c: &mut Criterion) {
    let text = format!("<a>{}</a>", "&lt;&amp;&#65;&#x42;&sp;".repeat(200));

    c.bench_function("lex_entity_heavy_1000", |b| {
        b.iter(|| {
            black_box(Lexer::from_text(black_box(&text)).count());
        })
    });
}

criterion_group!(
    benches,
    bench_lex_100_questions,
    bench_write_100_questions,
    bench_parse_100_questions,
    bench_entity_heavy_text,
);
criterion_main!(benches);
