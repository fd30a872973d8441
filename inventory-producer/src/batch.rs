use inventory_common::message::{Message, MAX_BATCH_SIZE};

/// Collects message bodies into batches the queue accepts in a single call.
///
/// Each pushed body is assigned the next batch-local sequence id, starting at 1. Flushing
/// hands out the batch and starts a new one, so ids restart at 1.
#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    messages: Vec<Message>,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BATCH_SIZE)
    }

    /// Capacity is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BATCH_SIZE);
        Self {
            capacity,
            messages: Vec::with_capacity(capacity),
        }
    }

    /// Append a body, returning whether the batch is now full and must be flushed.
    pub fn push(&mut self, body: String) -> bool {
        let sequence_id = self.messages.len() + 1;
        self.messages.push(Message::new(sequence_id, body));
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flush(&mut self) -> Vec<Message> {
        std::mem::replace(&mut self.messages, Vec::with_capacity(self.capacity))
    }
}
