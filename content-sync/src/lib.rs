//! Dependency-aware content reconciliation between two headless CMS instances

pub mod api;
pub mod cli;
pub mod config;
pub mod sync;
