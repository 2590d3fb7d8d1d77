//! Catalog access for prodflow.
//!
//! Three logical catalogs are consulted while resolving a rule:
//!
//! - the **file catalog** (`datasets`): which raw and derived files exist,
//!   per run, segment and detector host;
//! - the **production-status catalog** (`production_status`): which
//!   outputs are queued, running or finished;
//! - the **run catalog** (`run`): run type, event counts and durations for
//!   run-quality cuts.
//!
//! [`SqliteCatalog`] implements all three over one SQLite file;
//! [`InMemoryCatalog`] does the same in memory with fault injection.

pub mod error;
pub mod lock;
pub mod memory;
pub mod query;
pub mod sqlite;
pub mod traits;

pub use error::{CatalogError, Result};
pub use lock::{acquire as acquire_lock, lock_path_for, LockError, LockGuard};
pub use memory::InMemoryCatalog;
pub use query::{FileQuery, RunFilter, SegmentFilter, StatusQuery, StatusUpdate};
pub use sqlite::SqliteCatalog;
pub use traits::{bounded, Catalog, FileCatalog, RunCatalog, StatusCatalog};
