// Signing benchmarks for the local half of the workflow.
//
// Covers key generation, signer-payload encoding and signing, and the
// sandbox's verification path at a few transaction body sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nftflow_orchestrator::crypto::AccountKeypair;
use nftflow_orchestrator::operation::SignerPayload;
use nftflow_orchestrator::signer::Signer;

fn payload(keypair: &AccountKeypair, body_len: usize) -> SignerPayload {
    SignerPayload {
        sender: keypair.address(),
        nonce: 42,
        fee: 100_000_000,
        memo: "mint Pebble".into(),
        transaction: "x".repeat(body_len),
    }
}

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("ed25519/keypair_generate", |b| {
        b.iter(AccountKeypair::generate);
    });
}

fn bench_payload_digest(c: &mut Criterion) {
    let keypair = AccountKeypair::generate();
    let payload = payload(&keypair, 4_096);

    c.bench_function("payload/digest_4k", |b| {
        b.iter(|| payload.digest());
    });
}

fn bench_sign_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload/sign");

    for size in [256, 4_096, 65_536] {
        let keypair = AccountKeypair::generate();
        let payload = payload(&keypair, size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| keypair.sign(payload).unwrap());
        });
    }

    group.finish();
}

fn bench_verify_payload(c: &mut Criterion) {
    let keypair = AccountKeypair::generate();
    let payload = payload(&keypair, 4_096);
    let bytes = payload.signable_bytes();
    let signature = keypair.sign_bytes(&bytes);
    let public_key = keypair.public_key();

    c.bench_function("payload/verify_4k", |b| {
        b.iter(|| public_key.verify(&bytes, &signature));
    });
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_payload_digest,
    bench_sign_payload,
    bench_verify_payload,
);
criterion_main!(benches);
