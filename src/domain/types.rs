#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSnapshot {
    pub pending: usize,
}
