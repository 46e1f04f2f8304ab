//! Weekly Watch: a watchlist engine that turns daily price bars into weekly
//! candles and KDJ, RSI and moving-average series, computed off the async
//! runtime on bounded worker pools.

pub mod aggregator;
pub mod app_state;
pub mod error;
pub mod executor;
pub mod indicators;
pub mod market_data;
pub mod pipeline;
pub mod runtime_config;
pub mod storage;
pub mod types;
pub mod watchlist;
