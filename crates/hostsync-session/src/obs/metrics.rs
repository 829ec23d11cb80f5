//! Minimal metrics registry for a session process.
//!
//! Labels are flattened into sorted key vectors so rendering order is
//! deterministic. Histogram buckets are fixed in milliseconds.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self.map.entry(label_key(labels)).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value for an exact label set (0 when never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, render_labels(r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) { self.add(labels, 1); }
    pub fn dec(&self, labels: &[(&str, &str)]) { self.add(labels, -1); }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self.map.entry(label_key(labels)).or_insert_with(|| AtomicI64::new(0));
        gauge.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, render_labels(r.key()), val);
        }
    }
}

// 1ms, 5ms, 10ms, 50ms, 100ms, 500ms, 1s, 5s
const BUCKETS_MILLIS: [u64; 8] = [1, 5, 10, 50, 100, 500, 1_000, 5_000];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 8],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    /// Observe a duration into cumulative buckets (millisecond scale).
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(label_key(labels)).or_default();
        let millis = duration.as_millis() as u64;

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(millis, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MILLIS.iter().enumerate() {
            if millis <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let label_str = render_labels(r.key());
            let prefix = if label_str.is_empty() { String::new() } else { format!("{},", label_str) };

            for (i, &le) in BUCKETS_MILLIS.iter().enumerate() {
                let count = hist.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let sum = hist.sum.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, label_str, sum);
            let _ = writeln!(out, "{}_count{{{}}} {}", name, label_str, count);
        }
    }
}

#[derive(Default)]
pub struct SessionMetrics {
    /// Unset->Set and Set->Set commits, by channel.
    pub channel_transitions: CounterVec,
    pub authority_violations: CounterVec,
    pub unresolved_identities: CounterVec,
    pub relay_failures: CounterVec,
    pub lobby_failures: CounterVec,
    pub decode_errors: CounterVec,
    pub broadcast_timeouts: CounterVec,
    pub connections_active: GaugeVec,
    pub relay_call_duration: HistogramVec, // milliseconds
    shut_down: AtomicBool,
}

impl SessionMetrics {
    pub fn set_shut_down(&self) { self.shut_down.store(true, Ordering::Relaxed); }
    pub fn is_shut_down(&self) -> bool { self.shut_down.load(Ordering::Relaxed) }

    /// Render all registered metrics.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.channel_transitions.render("hostsync_channel_transitions_total", &mut out);
        self.authority_violations.render("hostsync_authority_violations_total", &mut out);
        self.unresolved_identities.render("hostsync_unresolved_identities_total", &mut out);
        self.relay_failures.render("hostsync_relay_failures_total", &mut out);
        self.lobby_failures.render("hostsync_lobby_failures_total", &mut out);
        self.decode_errors.render("hostsync_decode_errors_total", &mut out);
        self.broadcast_timeouts.render("hostsync_broadcast_timeouts_total", &mut out);
        self.connections_active.render("hostsync_connections_active", &mut out);
        self.relay_call_duration.render("hostsync_relay_call_duration_millis", &mut out);

        let _ = writeln!(
            out,
            "# TYPE hostsync_shut_down gauge\nhostsync_shut_down {}",
            if self.is_shut_down() { 1 } else { 0 }
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_labels_are_order_insensitive() {
        let m = SessionMetrics::default();
        m.authority_violations.inc(&[("channel", "theme"), ("origin", "local")]);
        m.authority_violations.inc(&[("origin", "local"), ("channel", "theme")]);
        assert_eq!(m.authority_violations.get(&[("channel", "theme"), ("origin", "local")]), 2);
    }

    #[test]
    fn render_includes_histogram_buckets() {
        let m = SessionMetrics::default();
        m.relay_call_duration.observe(&[("op", "create")], Duration::from_millis(7));
        let text = m.render();
        assert!(text.contains("hostsync_relay_call_duration_millis_bucket{op=\"create\",le=\"5\"} 0"));
        assert!(text.contains("hostsync_relay_call_duration_millis_bucket{op=\"create\",le=\"10\"} 1"));
        assert!(text.contains("hostsync_shut_down 0"));
    }
}
