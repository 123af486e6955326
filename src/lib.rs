//! Read-only lookup engine for license-protected CZDB IP databases.
//!
//! ```no_run
//! use czdb_engine::{DbSearcher, SearchMode};
//!
//! let searcher = DbSearcher::open("cz88_public_v4.czdb", SearchMode::Memory, "YOUR_SECRET_KEY")?;
//! if let Some(region) = searcher.search("8.8.8.8")? {
//!     println!("{region}");
//! }
//! # Ok::<(), czdb_engine::CzdbError>(())
//! ```

pub mod block;
pub mod byte_util;
pub mod compare;
pub mod decrypt;
pub mod error;
pub mod header;
pub mod raf;
pub mod region;
pub mod searcher;
pub mod writer;

pub use crate::block::DbType;
pub use crate::error::{CzdbError, Result};
pub use crate::header::{DecryptedBlock, HyperHeaderBlock, HyperHeaderDecoder};
pub use crate::searcher::{DbSearcher, SearchMode};
pub use crate::writer::DatabaseBuilder;
