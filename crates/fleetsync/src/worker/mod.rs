pub mod queue;

pub use queue::{BackgroundQueue, QueueStats, TaskError};
