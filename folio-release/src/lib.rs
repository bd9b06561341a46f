//! # folio-release
//!
//! Versioned release directories and the atomic `current` pointer.
//!
//! ```text
//! <base>/
//! ├── releases/
//! │   └── <id>/
//! │       ├── .metadata/
//! │       │   ├── id
//! │       │   └── tasks/<task>
//! │       └── ...payload
//! └── current -> releases/<id>
//! ```
//!
//! A release only becomes `current` once its publishing task is `done`.

pub mod error;
pub mod manager;
pub mod release;
pub mod task;

pub use error::ReleaseError;
pub use manager::ReleaseManager;
pub use release::Release;
pub use task::{Task, TaskState};
