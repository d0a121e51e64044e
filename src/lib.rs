//! sable: a small embeddable scripting language.
//!
//! Source is fed a line at a time to a [`Session`], compiled to 32-bit
//! bytecode and run on a stack VM owned by a [`Runtime`]. Heap objects are
//! reference counted; cycles are reclaimed only when `gc()` is called or
//! the runtime is dropped.
//!
//! ```no_run
//! use sable::{Runtime, Session};
//!
//! let mut rt = Runtime::new()?;
//! let mut ses = Session::new();
//! ses.feed(&mut rt, "x = 6 * 7")?;
//! ses.feed(&mut rt, "print(x)")?;
//! # Ok::<(), sable::Error>(())
//! ```

pub mod arena;
pub mod bytecode;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod consts;
pub mod diagnostic;
pub mod heap;
pub mod lexer;
pub mod natives;
pub mod runtime;
pub mod session;
pub mod value;
pub mod vars;
pub mod vm;

pub use arena::CapacityError;
pub use compiler::ParseError;
pub use config::Config;
pub use heap::HostObject;
pub use natives::NativeId;
pub use runtime::Runtime;
pub use session::Session;
pub use value::Value;
pub use vm::{RuntimeError, Vm, VmError, VmResult};

/// Everything that can go wrong feeding source to a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("cannot open file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("global already exists: {0}")]
    Exists(String),
}
