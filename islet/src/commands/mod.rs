//! Command modules for the islet CLI.
//!
//! Each subcommand implements [`traits::Command`] in its own file and
//! returns a report that `traits::run` prints as text or JSON.

pub mod common;
pub mod traits;

pub mod contend;
pub mod hash;
pub mod inspect;
pub mod load;
pub mod sign;

pub use contend::{ContendArgs, ContendCommand};
pub use hash::{HashArgs, HashCommand};
pub use inspect::{InspectArgs, InspectCommand};
pub use load::{LoadArgs, LoadCommand};
pub use sign::{SignArgs, SignCommand};
