// =============================================================================
// Task Executor — bounded worker pools for CPU-bound pipeline stages
// =============================================================================
//
// Aggregation and indicator math run on dedicated OS threads so the async
// runtime never blocks. Pools are owned by a `PoolRegistry`, not a global.
// =============================================================================

pub mod pool;
pub mod registry;
pub mod task;
mod worker;

pub use pool::{PoolStatus, StatusListener, StatusSubscription, WorkerPool};
pub use registry::{PoolRegistry, RegistryListener, RegistrySubscription};
pub use task::{default_handler, execute, Task, TaskHandler, TaskKind, TaskOutput};
