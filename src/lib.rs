pub mod aggregate;
pub mod cache;
pub mod cleaning;
pub mod config;
pub mod derive;
pub mod fetch;
pub mod ingest;
pub mod means;
pub mod model;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod plots;
pub mod report;
pub mod stats;
pub mod utility;
