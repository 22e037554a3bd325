//! Running statistics of one ping-stream session.
//!
//! [StreamStats] accumulates replies and unanswered probes and yields an
//! [Observation] per reply plus a final [Summary]. The session is the unit
//! of statistical memory: a fresh session always starts from
//! [StreamStats::new].

use serde::Serialize;

/// RFC 3550 interarrival jitter estimator (smoothing factor 1/16).
#[derive(Clone, Debug, Default)]
pub struct Jitter {
    value: f64,
    last: Option<f64>,
}

impl Jitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one latency sample into the estimate and return the new value.
    ///
    /// The first sample only primes the estimator.
    pub fn update(&mut self, rtt_ms: f64) -> f64 {
        if let Some(prev) = self.last {
            let d = rtt_ms - prev;
            self.value += (d.abs() - self.value) / 16.0;
        }
        self.last = Some(rtt_ms);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Metrics attached to a single reply.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub loss_percent: f64,
}

/// Roll-up of an entire ping-stream session.
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    pub attempts: u64,
    pub replies: u64,
    pub packet_loss: f64,
    pub min_latency_ms: Option<f64>,
    pub mean_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub jitter_ms: f64,
}

/// Mutable accumulator used during a session.
#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    attempts: u64,
    replies: u64,
    first_seq: Option<u64>,
    total_rtt: f64,
    min_rtt: Option<f64>,
    max_rtt: Option<f64>,
    jitter: Jitter,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an answered probe and return the metrics for its row.
    pub fn record_reply(&mut self, rtt_ms: f64, seq: Option<u64>) -> Observation {
        self.count_attempt(seq);
        self.replies += 1;
        self.total_rtt += rtt_ms;
        self.min_rtt = Some(self.min_rtt.map_or(rtt_ms, |m| m.min(rtt_ms)));
        self.max_rtt = Some(self.max_rtt.map_or(rtt_ms, |m| m.max(rtt_ms)));
        let jitter_ms = self.jitter.update(rtt_ms);

        Observation {
            rtt_ms,
            jitter_ms,
            loss_percent: self.loss_percent(),
        }
    }

    /// Record a probe the tool reported as unanswered.
    pub fn record_unanswered(&mut self, seq: Option<u64>) {
        self.count_attempt(seq);
    }

    // Sequence gaps mean probes went out without any line reporting them,
    // so the attempt count never drops below the observed sequence span.
    fn count_attempt(&mut self, seq: Option<u64>) {
        self.attempts += 1;
        if let Some(seq) = seq {
            let first = *self.first_seq.get_or_insert(seq);
            if seq >= first {
                self.attempts = self.attempts.max(seq - first + 1);
            }
        }
    }

    /// Loss over the session so far, always within `[0, 100]`.
    pub fn loss_percent(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        ((1.0 - self.replies as f64 / self.attempts as f64) * 100.0).clamp(0.0, 100.0)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn replies(&self) -> u64 {
        self.replies
    }

    pub fn jitter_ms(&self) -> f64 {
        self.jitter.value()
    }

    /// Produce the final [Summary].
    pub fn summary(&self) -> Summary {
        Summary {
            attempts: self.attempts,
            replies: self.replies,
            packet_loss: self.loss_percent(),
            min_latency_ms: self.min_rtt,
            mean_latency_ms: (self.replies > 0).then(|| self.total_rtt / self.replies as f64),
            max_latency_ms: self.max_rtt,
            jitter_ms: self.jitter.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jitter_after(rtts: &[f64]) -> f64 {
        let mut j = Jitter::new();
        rtts.iter().for_each(|&r| {
            j.update(r);
        });
        j.value()
    }

    #[test]
    fn first_reply_leaves_jitter_at_zero() {
        let mut j = Jitter::new();
        assert_eq!(j.update(42.0), 0.0);
    }

    #[test]
    fn constant_latency_never_drifts() {
        assert_eq!(jitter_after(&[10.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn single_step_is_one_sixteenth_of_the_delta() {
        assert_eq!(jitter_after(&[10.0, 30.0]), 1.25);
    }

    #[test]
    fn replaying_a_sequence_is_deterministic() {
        let seq = [12.3, 15.9, 11.1, 40.2, 13.0, 12.8];
        assert_eq!(jitter_after(&seq).to_bits(), jitter_after(&seq).to_bits());
    }

    #[test]
    fn summary_handles_zero_replies() {
        let stats = StreamStats::new();
        let summary = stats.summary();
        assert_eq!(summary.attempts, 0);
        assert_eq!(summary.packet_loss, 0.0);
        assert_eq!(summary.mean_latency_ms, None);
    }

    #[test]
    fn replies_only_report_no_loss() {
        let mut stats = StreamStats::new();
        for rtt in [10.0, 20.0, 30.0] {
            assert_eq!(stats.record_reply(rtt, None).loss_percent, 0.0);
        }
        let summary = stats.summary();
        assert_eq!(summary.mean_latency_ms, Some(20.0));
        assert_eq!(summary.min_latency_ms, Some(10.0));
        assert_eq!(summary.max_latency_ms, Some(30.0));
    }

    #[test]
    fn sequence_gap_counts_as_loss() {
        let mut stats = StreamStats::new();
        stats.record_reply(10.0, Some(1));
        stats.record_reply(10.0, Some(2));
        let obs = stats.record_reply(10.0, Some(4));
        assert_eq!(stats.attempts(), 4);
        assert_eq!(obs.loss_percent, 25.0);
    }

    #[test]
    fn unanswered_probe_counts_as_attempt() {
        let mut stats = StreamStats::new();
        stats.record_reply(10.0, Some(0));
        stats.record_unanswered(Some(1));
        assert_eq!(stats.attempts(), 2);
        assert_eq!(stats.replies(), 1);
        assert_eq!(stats.loss_percent(), 50.0);
    }

    #[test]
    fn loss_stays_in_range() {
        let mut stats = StreamStats::new();
        for seq in 0..5 {
            stats.record_unanswered(Some(seq));
            assert!((0.0..=100.0).contains(&stats.loss_percent()));
        }
        assert_eq!(stats.loss_percent(), 100.0);
        stats.record_reply(5.0, Some(7));
        assert!((0.0..=100.0).contains(&stats.loss_percent()));
    }
}
