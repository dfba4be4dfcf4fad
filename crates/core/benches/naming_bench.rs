use criterion::{Criterion, black_box, criterion_group, criterion_main};

use overlay_cnm_core::naming::{NamingScheme, NetworkIdentity};

fn naming_benchmark(c: &mut Criterion) {
    let scheme = NamingScheme::default();
    let identity = NetworkIdentity::new(
        "8d1f0c2b9e6a4f5d8c7b6a5f4e3d2c1b",
        "acme",
        "web-frontend",
        "10.10.0.0/16",
    );
    let name = scheme.generate_name(&identity);

    c.bench_function("generate_name", |b| {
        b.iter(|| scheme.generate_name(black_box(&identity)))
    });
    c.bench_function("split_name", |b| {
        b.iter(|| scheme.split_name(black_box(&name)))
    });
    c.bench_function("is_owned_foreign", |b| {
        b.iter(|| scheme.is_owned(black_box("nat")))
    });
}

criterion_group!(benches, naming_benchmark);
criterion_main!(benches);
