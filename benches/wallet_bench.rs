//! 性能基准测试
//! 使用criterion进行性能测试

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ironwallet::{
    domain::{identity::Identity, transaction::TransactionRecord, transaction_status::TxStatus},
    metrics,
    service::activity_aggregator::merge_tracked,
    utils::address_format,
};

const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn bench_derivation(c: &mut Criterion) {
    c.bench_function("derive_identity_from_phrase", |b| {
        b.iter(|| Identity::from_recovery_phrase(black_box(PHRASE)))
    });
}

fn bench_address_check(c: &mut Criterion) {
    c.bench_function("check_checksummed_address", |b| {
        b.iter(|| address_format::check_evm_address(black_box("0x9858EfFD232B4033E47d90003D41EC34EcaEda94")))
    });
}

fn bench_merge(c: &mut Criterion) {
    let history: Vec<TransactionRecord> = (0..500)
        .map(|i| TransactionRecord {
            hash: format!("0x{:064x}", i),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            value: "0.1".to_string(),
            timestamp: 1_700_000_000 - i,
            status: TxStatus::Confirmed,
        })
        .collect();
    let mut tracked = history[250].clone();
    tracked.status = TxStatus::Pending;

    c.bench_function("merge_tracked_500", |b| {
        b.iter(|| merge_tracked(black_box(Some(&tracked)), black_box(&history)))
    });
}

fn bench_metrics_rendering(c: &mut Criterion) {
    c.bench_function("render_prometheus_metrics", |b| {
        b.iter(|| {
            metrics::count_rpc_ok("eth_getBalance");
            metrics::count_rpc_err("eth_getBalance");
            black_box(metrics::render_prometheus())
        })
    });
}

criterion_group!(
    benches,
    bench_derivation,
    bench_address_check,
    bench_merge,
    bench_metrics_rendering
);
criterion_main!(benches);
