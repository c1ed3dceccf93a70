#![forbid(unsafe_code)]

//! Lifecycle event bus for the xget chunked downloader.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{RetrySnapshot, XgetEvent};
