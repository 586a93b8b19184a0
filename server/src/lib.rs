//! Studio Server - Task time tracking and scoped workspace files.
//!
//! This crate provides the backend of the studio dashboard, responsible for:
//! - Storing clients, projects and tasks
//! - Starting and stopping per-task timers and reporting elapsed time
//! - Reading and writing files confined to a single workspace directory
//! - Gating the API behind passcode sessions
//! - Summarizing remote pages and reporting snapshot size
//!
//! # Architecture
//!
//! The elapsed-time tracker ([`tracker`]) is a set of functions over a
//! [`store::TaskRepository`]; nothing runs in the background and every
//! reader computes the live value from the stored record. File access goes
//! through [`workspace::Workspace`], which resolves every requested path
//! against its root and refuses anything that lands outside it.

pub mod applog;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod scrape;
pub mod store;
pub mod tracker;
pub mod types;
pub mod workspace;
