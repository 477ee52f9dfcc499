// 公开导出的模块，供外部使用
pub mod models;
pub mod errors;
pub mod config;
pub mod scrapers;
pub mod services;
pub mod store;

#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use models::fund::{DateRange, FetchRequest, FundQuote, FundRecord};
pub use errors::{Result, FundHubError};
pub use config::Config;
pub use store::{FundStore, WriteReport};
pub use services::pipeline::{BatchReport, FundPipeline, FundReport};
