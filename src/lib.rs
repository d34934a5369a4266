pub mod change;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod operation;
pub mod source;

pub use change::{ChangeId, ChangeRecord, ChangeStatus, Direction, LedgerEntry};
pub use config::LedgerConfig;
pub use engine::LedgerEngine;
pub use error::{LedgerError, Result};
pub use executor::{Executor, LedgerStore, MemoryExecutor, SqliteExecutor};
pub use operation::{
    DefaultValue, FieldSpec, FieldType, Operation, ReferentialAction,
};
pub use source::{ChangeSource, DirectorySource, StaticSource};
