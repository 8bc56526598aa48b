pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod icons;
pub mod ingestor;
pub mod lookup;
pub mod models;
pub mod remote;
pub mod resolver;
pub mod utils;
pub mod web;
