//! Domain model and data-layer contracts shared by the CTFNote sync crates.
//!
//! The database is the source of truth: `CtfStore` exposes the rows the
//! Discord side mirrors, and `WorkspaceLinks` records which Discord object a
//! row was last seen as.

pub mod memory;
pub mod model;
pub mod store;

pub use memory::InMemoryCtfStore;
pub use model::{
    Ctf, CtfId, CtfPatch, Invitation, NewTask, Profile, ProfileId, Task, TaskId, TaskPatch,
};
pub use store::{CtfStore, LinkKind, StoreError, StoreResult, WorkspaceLinks};
