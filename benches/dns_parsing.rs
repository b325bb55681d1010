use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sentrynet_core::dns::{DnsPacket, DnsResourceType};

fn bench_query_roundtrip(c: &mut Criterion) {
    let query = DnsPacket::new_query(0x1234, "www.example.com.", DnsResourceType::A);
    let bytes = query.serialize().expect("synthetic query always serializes");

    c.bench_function("parse a-record query", |b| {
        b.iter(|| {
            let parsed = DnsPacket::parse(black_box(&bytes)).expect("bench fixture is valid");
            black_box(parsed);
        });
    });

    c.bench_function("serialize a-record query", |b| {
        b.iter(|| {
            let out = black_box(&query).serialize().expect("bench fixture always serializes");
            black_box(out);
        });
    });
}

fn bench_response_with_answer(c: &mut Criterion) {
    let query = DnsPacket::new_query(0x1234, "www.example.com.", DnsResourceType::A);
    let mut response = DnsPacket::response_shell(&query);
    response
        .answers
        .push(sentrynet_core::dns::DnsRecord::a("www.example.com.", 300, "93.184.216.34".parse().unwrap()));
    let bytes = response.serialize().expect("synthetic response always serializes");

    c.bench_function("parse a-record response", |b| {
        b.iter(|| {
            let parsed = DnsPacket::parse(black_box(&bytes)).expect("bench fixture is valid");
            black_box(parsed);
        });
    });
}

criterion_group!(benches, bench_query_roundtrip, bench_response_with_answer);
criterion_main!(benches);
