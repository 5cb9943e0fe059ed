pub(crate) mod deps {
    pub use derive_more;
    pub use lazy_static;
    pub use log;
    pub use nix;
    pub use serde;
    pub use thiserror;
}

mod fmt;
mod io;

pub mod error;
pub mod paths;
pub mod pid;
pub mod word;

pub mod mem;
pub mod pool;
pub mod spill;

pub mod scan;

pub mod chain;
pub mod codec;

pub mod compare;
pub mod cli;

pub use error::{
    Error,
    Result,
};
