//! 进程内计数器，`render_prometheus` 输出文本格式

use std::{
    collections::BTreeMap,
    sync::{Mutex, OnceLock},
};

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

#[derive(Default)]
struct MetricsState {
    rpc_ok: BTreeMap<&'static str, u64>,
    rpc_err: BTreeMap<&'static str, u64>,
    broadcast_ok: u64,
    broadcast_rejected: u64,
    // 终态 -> 次数
    settled: BTreeMap<&'static str, u64>,
    receipt_polls: u64,
    history_fetch_err: u64,
    // 校验结果 -> 次数
    validations: BTreeMap<&'static str, u64>,
}

fn state() -> std::sync::MutexGuard<'static, MetricsState> {
    let lock = METRICS.get_or_init(|| Mutex::new(MetricsState::default()));
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

pub fn count_rpc_ok(method: &'static str) {
    *state().rpc_ok.entry(method).or_insert(0) += 1;
}

pub fn count_rpc_err(method: &'static str) {
    *state().rpc_err.entry(method).or_insert(0) += 1;
}

pub fn count_broadcast(accepted: bool) {
    let mut s = state();
    if accepted {
        s.broadcast_ok += 1;
    } else {
        s.broadcast_rejected += 1;
    }
}

pub fn count_settled(status: &'static str) {
    *state().settled.entry(status).or_insert(0) += 1;
}

pub fn count_receipt_poll() {
    state().receipt_polls += 1;
}

pub fn count_history_error() {
    state().history_fetch_err += 1;
}

pub fn count_validation(outcome: &'static str) {
    *state().validations.entry(outcome).or_insert(0) += 1;
}

pub fn broadcast_totals() -> (u64, u64) {
    let s = state();
    (s.broadcast_ok, s.broadcast_rejected)
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    out.push_str("# HELP ironwallet_rpc_requests_total RPC calls per method\n");
    out.push_str("# TYPE ironwallet_rpc_requests_total counter\n");
    for (method, v) in s.rpc_ok.iter() {
        out.push_str(&format!(
            "ironwallet_rpc_requests_total{{method=\"{}\",result=\"ok\"}} {}\n",
            method, v
        ));
    }
    for (method, v) in s.rpc_err.iter() {
        out.push_str(&format!(
            "ironwallet_rpc_requests_total{{method=\"{}\",result=\"err\"}} {}\n",
            method, v
        ));
    }

    out.push_str("# HELP ironwallet_broadcast_total Broadcast attempts\n");
    out.push_str("# TYPE ironwallet_broadcast_total counter\n");
    out.push_str(&format!(
        "ironwallet_broadcast_total{{result=\"accepted\"}} {}\n",
        s.broadcast_ok
    ));
    out.push_str(&format!(
        "ironwallet_broadcast_total{{result=\"rejected\"}} {}\n",
        s.broadcast_rejected
    ));

    out.push_str("# HELP ironwallet_tx_settled_total Tracked transactions reaching a final state\n");
    out.push_str("# TYPE ironwallet_tx_settled_total counter\n");
    for (status, v) in s.settled.iter() {
        out.push_str(&format!(
            "ironwallet_tx_settled_total{{status=\"{}\"}} {}\n",
            status, v
        ));
    }

    out.push_str("# HELP ironwallet_receipt_polls_total Receipt polls issued\n");
    out.push_str("# TYPE ironwallet_receipt_polls_total counter\n");
    out.push_str(&format!("ironwallet_receipt_polls_total {}\n", s.receipt_polls));

    out.push_str("# HELP ironwallet_history_errors_total Failed history fetches\n");
    out.push_str("# TYPE ironwallet_history_errors_total counter\n");
    out.push_str(&format!(
        "ironwallet_history_errors_total {}\n",
        s.history_fetch_err
    ));

    out.push_str("# HELP ironwallet_address_validations_total Address validation outcomes\n");
    out.push_str("# TYPE ironwallet_address_validations_total counter\n");
    for (outcome, v) in s.validations.iter() {
        out.push_str(&format!(
            "ironwallet_address_validations_total{{outcome=\"{}\"}} {}\n",
            outcome, v
        ));
    }

    out
}
