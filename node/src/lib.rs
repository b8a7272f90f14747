// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod api;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod middleware;
pub mod network;
pub mod node;
pub mod server;
pub mod store;
pub mod telemetry;

pub use node::Node;
