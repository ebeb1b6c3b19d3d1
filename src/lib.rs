pub mod config;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod process;
pub mod storage;
