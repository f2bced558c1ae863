//! # sigil-tests — cross-crate integration scenarios.
//!
//! Shared mocks and fixtures for exercising the full wallet core:
//! store + discovery engine + agent store + orchestrator against
//! scriptable in-memory chain clients and signers.

pub mod helpers;
