// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use tlytics::Event;

/// `POST /batch` body. Events stay raw so a bad one can be reported as such.
#[derive(Deserialize, Serialize, Debug)]
pub struct BatchRequest {
    pub events: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QueuedResponse {
    pub message: String,
    pub count: usize,
}

/// Raw query strings; anything unparsable falls back to defaults.
#[derive(Deserialize, Debug, Default)]
pub struct ViewParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ViewResponse {
    pub events: Vec<Event>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct FlushResponse {
    pub flushed: usize,
    pub outcome: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub port: u16,
}
