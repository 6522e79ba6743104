use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Entropic feedback loop for self-regulating batch window adaptation.
///
/// Measures Shannon entropy H of inter-arrival intervals to distinguish
/// chaotic (high-H) from patterned (low-H) request streams, and applies
/// exponential scaling to the base batch window: chaos narrows the window
/// so the queue drains faster; regularity widens it back toward the base so
/// the dispatcher can exploit the pattern for larger batches.
pub struct HomeostaticGovernor {
    window_size: usize,
    base_batch_window_secs: f64,
    entropy_critical_threshold: f64,
    state: Mutex<GovernorState>,
}

struct GovernorState {
    arrivals: VecDeque<f64>,
    current_entropy: f64,
}

impl HomeostaticGovernor {
    pub fn new(window_size: usize, base_batch_window_secs: f64, entropy_critical_threshold: f64) -> Self {
        Self {
            window_size,
            base_batch_window_secs,
            entropy_critical_threshold,
            state: Mutex::new(GovernorState {
                arrivals: VecDeque::with_capacity(window_size),
                current_entropy: 0.0,
            }),
        }
    }

    pub fn record_arrival(&self, now: f64) {
        let mut state = self.state.lock().unwrap();
        if state.arrivals.len() >= self.window_size {
            state.arrivals.pop_front();
        }
        state.arrivals.push_back(now);
    }

    /// Recomputes and caches `current_entropy` in bits.
    pub fn entropy(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        let entropy = compute_entropy(&state.arrivals);
        state.current_entropy = entropy;
        entropy
    }

    pub fn current_entropy(&self) -> f64 {
        self.state.lock().unwrap().current_entropy
    }

    /// `base_window * exp(-H / 5.0)` seconds, recomputing entropy first.
    pub fn adaptive_window(&self) -> f64 {
        let h = self.entropy();
        self.base_batch_window_secs * (-h / 5.0).exp()
    }

    pub fn status(&self) -> &'static str {
        if self.current_entropy() < self.entropy_critical_threshold {
            "CRITICAL_BURST"
        } else {
            "STABLE"
        }
    }
}

fn compute_entropy(arrivals: &VecDeque<f64>) -> f64 {
    if arrivals.len() < 2 {
        return 0.0;
    }

    let intervals: Vec<f64> = arrivals
        .iter()
        .zip(arrivals.iter().skip(1))
        .filter_map(|(prev, next)| {
            let delta = next - prev;
            (delta >= 0.0).then_some(delta)
        })
        .collect();

    if intervals.is_empty() {
        return 0.0;
    }

    // Bin at 1ms precision.
    let mut bins: HashMap<i64, usize> = HashMap::new();
    for delta in &intervals {
        let bucket = (delta * 1000.0).round() as i64;
        *bins.entry(bucket).or_insert(0) += 1;
    }

    let total = intervals.len() as f64;
    -bins
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_arrivals_is_zero_entropy() {
        let gov = HomeostaticGovernor::new(50, 0.010, 1.5);
        assert_eq!(gov.entropy(), 0.0);
        gov.record_arrival(0.0);
        assert_eq!(gov.entropy(), 0.0);
    }

    #[test]
    fn perfectly_regular_arrivals_have_zero_entropy() {
        let gov = HomeostaticGovernor::new(50, 0.010, 1.5);
        for i in 0..50 {
            gov.record_arrival(i as f64 * 0.010);
        }
        assert!(gov.entropy().abs() < 1e-9);
        let window = gov.adaptive_window();
        assert!((window - 0.010).abs() < 1e-9);
        assert_eq!(gov.status(), "CRITICAL_BURST");
    }

    #[test]
    fn irregular_arrivals_raise_entropy_and_shrink_window() {
        let gov = HomeostaticGovernor::new(50, 0.010, 1.5);
        // 50 distinct intervals (each its own 1ms bucket) maximizes entropy
        // for this bin count: H = log2(49) for 49 unique deltas.
        let mut t = 0.0;
        for i in 0..50 {
            gov.record_arrival(t);
            t += 0.001 + (i as f64) * 0.002;
        }
        let h = gov.entropy();
        assert!(h > 2.0);
        let window = gov.adaptive_window();
        assert!(window < 0.010);
        assert_eq!(gov.status(), "STABLE");
    }

    #[test]
    fn window_is_bounded_by_base_when_entropy_nonnegative() {
        let gov = HomeostaticGovernor::new(50, 0.010, 1.5);
        for i in 0..20 {
            gov.record_arrival(i as f64 * 0.003 + (i % 3) as f64 * 0.0005);
        }
        let window = gov.adaptive_window();
        assert!(window > 0.0 && window <= 0.010);
    }

    #[test]
    fn ring_buffer_drops_oldest_beyond_window_size() {
        let gov = HomeostaticGovernor::new(3, 0.010, 1.5);
        for i in 0..10 {
            gov.record_arrival(i as f64);
        }
        assert_eq!(gov.state.lock().unwrap().arrivals.len(), 3);
    }
}
