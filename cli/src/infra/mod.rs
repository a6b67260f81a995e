//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, the
//! OpenSSH connector, filesystem watching, the audit log and config loading.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod audit;
pub mod command_runner;
pub mod config;
pub mod fs;
pub mod network;
pub mod ssh;
pub mod watcher;
