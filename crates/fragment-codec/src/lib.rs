//! Command codec for the pagebridge injection layer.
//!
//! Commands are structured (`verb`, `target`, `parameters`) and compile into
//! fragments built from static page-side templates. Dynamic values only ever
//! cross into a fragment through [`encode_literal`].

pub mod command;
pub mod fragment;
pub mod literal;

pub use command::{Capability, Command, InstallOptions, Verb};
pub use fragment::Fragment;
pub use literal::encode_literal;
