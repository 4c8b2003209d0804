//! Core domain types and simulation logic.

pub mod bar;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod rolling;
pub mod ticker_data;
pub mod strategy;
pub mod risk;
pub mod engine;
pub mod policy;
pub mod portfolio_engine;
pub mod metrics;
pub mod optimizer;
pub mod batch;
pub mod scan;
pub mod config_validation;
pub mod error;
