// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! tlytics: the event value type shared by the ingestion node, its remote
//! client and the operator CLI.

pub mod error;
pub mod event;
pub mod page;

pub use error::{EventError, EventResult};
pub use event::{Event, Payload};
pub use page::{total_pages, PageRequest};
