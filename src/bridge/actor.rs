//! Background tasks attached to one agent process.
//!
//! - `MessageRouter`: single-waiter correlation of decoded messages
//! - Reader Task: stdout bytes to routed messages
//! - Stderr Watcher: stderr lines to log output and OOM evidence

mod message_router;
mod reader;
mod stderr_watcher;

pub(crate) use message_router::{Delivery, MessageRouter};
pub(crate) use reader::{ReaderTaskHandle, spawn_reader_task};
pub(crate) use stderr_watcher::{StderrSummary, StderrWatcherHandle, spawn_stderr_watcher};
