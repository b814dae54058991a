pub mod config;
pub mod docx;
pub mod export;
pub mod pipeline;
pub mod progress;
pub mod report;
