use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lightweight in-memory metrics using atomic counters.
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub total_flow_runs: AtomicU64,
    pub total_flow_steps_executed: AtomicU64,
    pub total_ws_connections: AtomicU64,
    pub total_script_invocations: AtomicU64,
    /// Per-method request counts.
    method_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Latency histogram buckets (ms): <100, <500, <1000, <5000, <30000, >=30000.
    pub latency_buckets: [AtomicU64; 6],
    total_latency_ms: AtomicU64,
    created_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_flow_runs: AtomicU64::new(0),
            total_flow_steps_executed: AtomicU64::new(0),
            total_ws_connections: AtomicU64::new(0),
            total_script_invocations: AtomicU64::new(0),
            method_counts: RwLock::new(HashMap::new()),
            latency_buckets: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            total_latency_ms: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_request(&self, method: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        increment_map(&self.method_counts, method);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flow_run(&self, steps_executed: u64) {
        self.total_flow_runs.fetch_add(1, Ordering::Relaxed);
        self.total_flow_steps_executed
            .fetch_add(steps_executed, Ordering::Relaxed);
    }

    pub fn record_ws_connection(&self) {
        self.total_ws_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_script_invocation(&self) {
        self.total_script_invocations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency_ms(&self, ms: u128) {
        let bucket = match ms {
            0..=99 => 0,
            100..=499 => 1,
            500..=999 => 2,
            1000..=4999 => 3,
            5000..=29999 => 4,
            _ => 5,
        };
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(ms as u64, Ordering::Relaxed);
    }

    /// Snapshot current metrics as a JSON-serializable value.
    pub fn snapshot(&self) -> serde_json::Value {
        let method_counts = snapshot_map(&self.method_counts);
        let total_reqs = self.total_requests.load(Ordering::Relaxed);
        let total_errs = self.total_errors.load(Ordering::Relaxed);
        let uptime_secs = self.created_at.elapsed().as_secs();

        let error_rate = if total_reqs > 0 {
            total_errs as f64 / total_reqs as f64
        } else {
            0.0
        };
        let avg_latency = if total_reqs > 0 {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / total_reqs as f64
        } else {
            0.0
        };

        serde_json::json!({
            "total_requests": total_reqs,
            "total_errors": total_errs,
            "total_flow_runs": self.total_flow_runs.load(Ordering::Relaxed),
            "total_flow_steps_executed": self.total_flow_steps_executed.load(Ordering::Relaxed),
            "total_ws_connections": self.total_ws_connections.load(Ordering::Relaxed),
            "total_script_invocations": self.total_script_invocations.load(Ordering::Relaxed),
            "latency_ms": {
                "<100": self.latency_buckets[0].load(Ordering::Relaxed),
                "100-499": self.latency_buckets[1].load(Ordering::Relaxed),
                "500-999": self.latency_buckets[2].load(Ordering::Relaxed),
                "1000-4999": self.latency_buckets[3].load(Ordering::Relaxed),
                "5000-29999": self.latency_buckets[4].load(Ordering::Relaxed),
                ">=30000": self.latency_buckets[5].load(Ordering::Relaxed),
            },
            "by_method": method_counts,
            "avg_latency_ms": avg_latency,
            "error_rate": error_rate,
            "uptime_seconds": uptime_secs,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn increment_map(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) {
    if let Ok(m) = map.read()
        && let Some(counter) = m.get(key)
    {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if let Ok(mut m) = map.write() {
        m.entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
}

fn snapshot_map(map: &RwLock<HashMap<String, AtomicU64>>) -> serde_json::Value {
    let mut result = serde_json::Map::new();
    if let Ok(m) = map.read() {
        for (k, v) in m.iter() {
            result.insert(
                k.clone(),
                serde_json::Value::Number(v.load(Ordering::Relaxed).into()),
            );
        }
    }
    serde_json::Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_metrics() {
        let m = Metrics::new();
        m.record_request("GET");
        m.record_request("GET");
        m.record_request("POST");
        m.record_error();
        m.record_latency_ms(50);
        m.record_latency_ms(250);
        m.record_latency_ms(5000);
        m.record_flow_run(4);
        m.record_ws_connection();

        let snap = m.snapshot();
        assert_eq!(snap["total_requests"], 3);
        assert_eq!(snap["total_errors"], 1);
        assert_eq!(snap["by_method"]["GET"], 2);
        assert_eq!(snap["by_method"]["POST"], 1);
        assert_eq!(snap["latency_ms"]["<100"], 1);
        assert_eq!(snap["latency_ms"]["100-499"], 1);
        assert_eq!(snap["latency_ms"]["5000-29999"], 1);
        assert_eq!(snap["total_flow_runs"], 1);
        assert_eq!(snap["total_flow_steps_executed"], 4);
        assert_eq!(snap["total_ws_connections"], 1);
    }
}
