use crate::models::MailRecord;

/// Default number of records per pushed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Accumulates records and hands them out in batches of a fixed size.
///
/// [`Batcher::push`] returns a batch exactly when the buffer fills up and
/// [`Batcher::finish`] returns the remainder, or `None` when nothing is left,
/// so N records produce `ceil(N / size)` batches in input order.
#[derive(Debug)]
pub struct Batcher {
    batch_size: usize,
    buffer: Vec<MailRecord>,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn push(&mut self, record: MailRecord) -> Option<Vec<MailRecord>> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
            Some(full)
        } else {
            None
        }
    }

    pub fn finish(self) -> Option<Vec<MailRecord>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
