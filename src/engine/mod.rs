//! # Engine Module
//!
//! Internal ECS runtime implementation.
//!
//! This module contains all core building blocks:
//! - Archetype storage and the archetype registry
//! - Entity management and ownership tracking
//! - Deferred command buffers
//! - Query caching and streams
//! - The system tree and world loop
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod component;
pub mod storage;
pub mod archetype;
pub mod registry;
pub mod ownership;
pub mod manager;
pub mod commands;
pub mod query;
pub mod systems;
pub mod world;
