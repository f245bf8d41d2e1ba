pub mod agent;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod routes;
pub mod sentiment;
pub mod service;
pub mod storage;
pub mod store;
