pub mod bar_store;
pub mod price_source;

pub use bar_store::{BarSeriesStore, PendingAppend};
pub use price_source::{HttpPriceSource, PriceSource};
