/// Download progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Starting { total: u64 },
    Chunk { current: u64, total: u64 },
    Complete { total: u64 },
}

/// Callback receiving [`Progress`] events.
pub type ProgressCallback = dyn Fn(Progress) + Send + Sync;
