use std::time::Duration;

/// Wall time spent on one flushed batch, split by stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchTimes {
    pub classify: Duration,
    pub detect: Duration,
    pub annotate: Duration,
    pub write: Duration,
}

impl BatchTimes {
    pub fn total(&self) -> Duration {
        self.classify + self.detect + self.annotate + self.write
    }
}

/// Collects [`BatchTimes`] over a run for avg/min/max reporting.
#[derive(Debug, Default)]
pub struct AggregatedTimes {
    batches: Vec<BatchTimes>,
}

impl AggregatedTimes {
    pub fn push(&mut self, times: BatchTimes) {
        self.batches.push(times);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// The first batch pays for lazy model init, `skip_first` leaves it out
    /// unless it is the only one.
    fn considered(&self, skip_first: bool) -> &[BatchTimes] {
        if skip_first && self.batches.len() > 1 {
            &self.batches[1..]
        } else {
            &self.batches
        }
    }

    pub fn avg(&self, skip_first: bool) -> BatchTimes {
        let batches = self.considered(skip_first);
        if batches.is_empty() {
            return BatchTimes::default();
        }
        let n = batches.len() as u32;
        let sum = batches.iter().fold(BatchTimes::default(), |acc, t| BatchTimes {
            classify: acc.classify + t.classify,
            detect: acc.detect + t.detect,
            annotate: acc.annotate + t.annotate,
            write: acc.write + t.write,
        });
        BatchTimes {
            classify: sum.classify / n,
            detect: sum.detect / n,
            annotate: sum.annotate / n,
            write: sum.write / n,
        }
    }

    pub fn min(&self, skip_first: bool) -> BatchTimes {
        self.fold_each(skip_first, Duration::min)
    }

    pub fn max(&self, skip_first: bool) -> BatchTimes {
        self.fold_each(skip_first, Duration::max)
    }

    fn fold_each(&self, skip_first: bool, pick: fn(Duration, Duration) -> Duration) -> BatchTimes {
        let mut iter = self.considered(skip_first).iter();
        let Some(first) = iter.next() else {
            return BatchTimes::default();
        };
        iter.fold(*first, |acc, t| BatchTimes {
            classify: pick(acc.classify, t.classify),
            detect: pick(acc.detect, t.detect),
            annotate: pick(acc.annotate, t.annotate),
            write: pick(acc.write, t.write),
        })
    }
}
