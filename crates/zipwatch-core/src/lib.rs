//! Zipwatch Core - Archive and rerun building blocks
//!
//! Features:
//! - Trailing-edge debounce for async functions
//! - Zip archive transformer (load -> edit -> save to a new path)
//! - Archive site: entry lookup under a root-within-zip
//! - Declarative edit scripts (JSON) and closure modifiers
//! - Module cache with predicate-based invalidation for reruns

pub mod archive;
pub mod debounce;
pub mod edits;
pub mod error;
pub mod modules;
pub mod site;

pub use archive::{ArchiveTransformer, Verbosity, ZipHandle};
pub use debounce::{debounce, Debouncer};
pub use edits::{Edit, EditScript, Modifier, ModifyFuture};
pub use error::{Error, Result};
pub use modules::{clear_cache, load_edit_script, ModuleCache};
pub use site::{content_type, ArchiveSite, SiteFile};
