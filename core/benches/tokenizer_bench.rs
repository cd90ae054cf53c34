use criterion::{criterion_group, criterion_main, Criterion};
use shop_core::tokenizer::Analyzer;

const CATALOG_TEXT: &str = "Кроссовки Nike Air Max 90 мужские, белые. Верх из натуральной кожи, \
    амортизирующая подошва Air. Running shoes with a classic waffle outsole and padded collar. \
    Размеры 40-46, цвет: white/black.";

fn bench_tokenize(c: &mut Criterion) {
    let analyzer = Analyzer::default();
    c.bench_function("analyze_product_text", |b| b.iter(|| analyzer.analyze_with_variants(CATALOG_TEXT)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
