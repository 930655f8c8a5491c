/// Snapshot of traversal state handed to a progress reporter after each
/// batch.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Vertices processed so far.
    pub processed: usize,
    /// Total vertices in the pedigree.
    pub total: usize,
    /// Rows currently resident in the kinship store.
    pub cut_size: usize,
    /// Batches waiting in the scheduler.
    pub queue_len: usize,
}

impl Progress {
    /// Fraction of vertices processed, in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// Observer of traversal progress.
///
/// Reporters are advisory: they see the traversal but cannot alter its
/// results.
pub trait ProgressReporter {
    fn report(&mut self, progress: &Progress);
}

/// Default reporter; does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&mut self, _progress: &Progress) {}
}

/// Emits a progress line through the `log` facade every `every` batches.
#[derive(Debug)]
pub struct LogReporter {
    every: usize,
    batches_seen: usize,
}

impl LogReporter {
    pub fn new(every: usize) -> Self {
        Self {
            every,
            batches_seen: 0,
        }
    }
}

impl ProgressReporter for LogReporter {
    fn report(&mut self, progress: &Progress) {
        self.batches_seen += 1;
        if self.every == 0 || self.batches_seen % self.every != 0 {
            return;
        }
        log::info!(
            "processed {}/{} vertices ({:.1}%), cut size {}, {} batches queued",
            progress.processed,
            progress.total,
            100.0 * progress.fraction(),
            progress.cut_size,
            progress.queue_len,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let progress = Progress {
            processed: 25,
            total: 100,
            cut_size: 10,
            queue_len: 3,
        };
        assert_eq!(progress.fraction(), 0.25);

        let empty = Progress {
            processed: 0,
            total: 0,
            cut_size: 0,
            queue_len: 0,
        };
        assert_eq!(empty.fraction(), 1.0);
    }
}
