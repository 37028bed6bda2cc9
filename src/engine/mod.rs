//! # Engine Module
//!
//! Core building blocks of the store:
//! - component registry and typed columns
//! - archetype tables and the entity directory
//! - the world registry and its resources
//! - queries and table views
//! - command logs, systems and the stage runner
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod component;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod resources;
pub mod world;
pub mod query;
pub mod commands;
pub mod systems;
pub mod scheduler;
