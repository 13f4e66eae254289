//! Workspace branching and rebase engine.
//!
//! This crate provides:
//! - Extraction of the commands recorded in a content stream
//! - A command simulator replaying them against another base
//! - The workspace coordinator: create, rebase, publish, discard and delete

pub mod coordinator;
pub mod error;
pub mod extracted;
pub mod simulator;

pub use coordinator::{WorkspaceChange, WorkspaceCoordinator};
pub use error::{CommandFailure, Result, WorkspaceError};
pub use extracted::{ExtractedCommand, ExtractedCommands};
pub use simulator::{CommandSimulator, RebaseErrorHandlingStrategy, SimulatedCommand};
