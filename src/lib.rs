pub mod config;
pub mod errors;
pub mod extractor;
pub mod jobs;
pub mod models;
pub mod web;
