pub mod aggregate;
pub mod backtest;
pub mod config;
pub mod confidence;
pub mod error;
pub mod history;
pub mod model;
pub mod output;
pub mod period;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod series;
pub mod stats;
pub mod storage;
