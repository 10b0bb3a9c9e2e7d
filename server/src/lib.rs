//! Policy QA server: bridges a browser chat client and the external
//! document question-answering workers.
//!
//! Each request spawns one worker process, feeds it the payload on stdin,
//! drains its output under a deadline, and maps the outcome to an HTTP
//! response. Conversation history lives in SQLite behind a small gateway.

pub mod api;
pub mod config;
pub mod error;
pub mod response;
pub mod state;
pub mod store;
pub mod worker;
