// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event key is empty or only whitespace.
    #[error("Event key is required")]
    EmptyKey,
}

pub type EventResult<T> = core::result::Result<T, EventError>;
