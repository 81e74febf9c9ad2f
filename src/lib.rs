//! minidb: a single-node SQL database engine with a MySQL-like dialect.
//!
//! General design:
//!
//! Tables are heap files of fixed-size record slots (bitmap per page, TEXT
//! values spilling to overflow page chains), stored behind a buffer pool of
//! 16 KiB pages. B+tree index files map composite field keys to record ids.
//!
//! SQL text goes through a hand-written recursive-descent parser, the
//! binder, a logical planner, a predicate-pushdown rewrite, and a physical
//! planner that picks index scans and join algorithms. Execution is a
//! Volcano pull pipeline; a separate entry point runs the vectorised
//! operator variants over columnar chunks.
//!
//! Example:
//! ```no_run
//! use minidb::session::Session;
//! let session = Session::open(std::path::Path::new("demo_db")).unwrap();
//! session.execute_sql("CREATE TABLE t(id INT, name CHAR(20))").unwrap();
//! session.execute_sql("INSERT INTO t VALUES (1, 'hello')").unwrap();
//! let result = session.execute_one("SELECT * FROM t WHERE id = 1").unwrap();
//! for row in result.display_rows() {
//!     println!("{}", row.join(" | "));
//! }
//! ```

/// Uniform result codes.
pub mod rc;

/// Byte helpers and bitmaps.
pub mod util;

/// Runtime values.
pub mod value;

/// Attribute types and type-dispatched operations.
pub mod types;

/// Paged files and the buffer pool.
pub mod buffer;

/// Record pages, the record file handler and TEXT overflow.
pub mod record;

/// On-disk B+tree.
pub mod btree;

/// Table indexes over the B+tree.
pub mod index;

/// Table metadata and the heap table engine.
pub mod table;

/// The catalog.
pub mod db;

/// Transaction façade.
pub mod trx;

/// Tuples.
pub mod tuple;

/// Columnar chunks for the vectorised path.
pub mod chunk;

/// Expressions and aggregators.
pub mod expr;

/// Parsed SQL nodes.
pub mod ast;

/// SQL lexer and parser.
pub mod parse;

/// Statement binding.
pub mod stmt;

/// Logical plan.
pub mod plan;

/// Predicate pushdown rewriter.
pub mod rewrite;

/// Physical planning.
pub mod physical;

/// Volcano operators.
pub mod operator;

/// Join operators.
pub mod join;

/// Group-by operators.
pub mod group;

/// DML operators.
pub mod dml;

/// Subquery execution and cache.
pub mod subquery;

/// Sessions, the SQL driver and result sets.
pub mod session;

pub use crate::db::{Db, DbPtr};
pub use crate::rc::{DbError, Result};
pub use crate::session::{ResultSet, Session};
pub use crate::value::Value;
