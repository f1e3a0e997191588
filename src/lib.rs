pub mod cli;
pub mod date_provider;
pub mod date_range;
pub mod order;
pub mod pipeline;
pub mod plan;
pub mod query;
pub mod report;
pub mod repository;
pub mod row_factories;
pub mod seed;
pub mod store;
pub mod store_factory;
