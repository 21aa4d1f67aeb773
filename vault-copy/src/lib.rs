//! Library part of the `vault-copy` command line tool
//!
//! The copy engine lives in the `common` crate; this crate only turns flags, environment
//! variables and the config file into engine settings, see [`settings`].

pub mod settings;
