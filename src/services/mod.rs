pub mod cleaner;
pub mod export;
pub mod pipeline;
pub mod scheduler;
