pub mod orchestrator;
pub mod record;

pub use orchestrator::{
    CachedRecord, Orchestrator, PipelineSettings, ProgressFn, RefreshProgress, RefreshStage, AGGREGATION_POOL,
    INDICATOR_POOL,
};
pub use record::{IndicatorCarry, Quote, SecurityRecord, SecurityView};
