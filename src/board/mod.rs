//! Board core: columns, positions, WIP limits and moves.

pub mod db;
pub mod models;
pub mod mover;
pub mod position;
pub mod store;
pub mod wip;

pub use db::{BoardDb, DbHandle};
pub use models::{Project, Task, TaskFilter, TaskStatus, TransitionPolicy, WipLimits};
pub use mover::{MoveCoordinator, MoveOutcome, MoveRequest};
pub use position::{Placement, PositionAllocator, PositionUpdate, PositionedItem, Slot};
pub use store::{MemoryStore, ProjectStore, Stores, TaskStore, UserStore, WipLimitStore};
pub use wip::{WipDecision, WipGate, WipViolation};
