use std::collections::VecDeque;

/// Largest tolerated median clock offset against peers, in seconds.
pub const TOLERANT_OFFSET: u64 = 7 * 60;

const MIN_SAMPLES: usize = 5;
const MAX_SAMPLES: usize = 11;

/// Median-of-samples estimate of our clock skew against the network.
///
/// Each peer handshake contributes one offset sample (peer time minus
/// local time). Too few samples is treated as fine; once the median drifts
/// past the tolerance, `check` reports it so the node can warn loudly.
pub struct NetTimeChecker {
    samples: VecDeque<i64>,
    min_samples: usize,
    max_samples: usize,
    tolerant_offset: u64,
}

impl NetTimeChecker {
    pub fn new(min_samples: usize, max_samples: usize, tolerant_offset: u64) -> Self {
        NetTimeChecker {
            samples: VecDeque::with_capacity(max_samples + 1),
            min_samples,
            max_samples,
            tolerant_offset,
        }
    }

    pub fn add_sample(&mut self, offset: i64) {
        self.samples.push_back(offset);
        if self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    fn median(&self) -> Option<i64> {
        if self.samples.len() < self.min_samples {
            return None;
        }
        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted.get((sorted.len() - 1) / 2).copied()
    }

    /// `Err` carries the offending median offset.
    pub fn check(&self) -> Result<(), i64> {
        let median = match self.median() {
            Some(median) => median,
            None => return Ok(()),
        };
        if median.unsigned_abs() > self.tolerant_offset {
            Err(median)
        } else {
            Ok(())
        }
    }
}

impl Default for NetTimeChecker {
    fn default() -> Self {
        NetTimeChecker::new(MIN_SAMPLES, MAX_SAMPLES, TOLERANT_OFFSET)
    }
}
