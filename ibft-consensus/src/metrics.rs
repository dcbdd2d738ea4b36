use metrics::{Counter, Gauge, Histogram, Metrics, NoMetrics};

#[derive(Debug)]
#[non_exhaustive]
pub struct ConsensusMetrics {
    pub sequence: Box<dyn Gauge>,
    pub round: Box<dyn Gauge>,
    pub finalized: Box<dyn Counter>,
    pub rounds_timed_out: Box<dyn Counter>,
    pub round_changes: Box<dyn Counter>,
    pub rejected: Box<dyn Counter>,
    pub future_buffer: Box<dyn Gauge>,
    pub round_duration: Box<dyn Histogram>,
}

impl Default for ConsensusMetrics {
    fn default() -> Self {
        Self::new(&NoMetrics)
    }
}

impl ConsensusMetrics {
    pub fn new<M: Metrics>(m: &M) -> Self {
        Self {
            sequence: m.create_gauge("sequence", None),
            round: m.create_gauge("round", None),
            finalized: m.create_counter("finalized_blocks", None),
            rounds_timed_out: m.create_counter("rounds_timed_out", None),
            round_changes: m.create_counter("round_changes", None),
            rejected: m.create_counter("rejected_messages", None),
            future_buffer: m.create_gauge("future_buffer", None),
            round_duration: m.create_histogram("round_duration", Some("seconds")),
        }
    }
}
