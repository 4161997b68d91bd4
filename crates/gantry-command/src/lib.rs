//! Command grammar for the gantry deployment bot.
//!
//! Chat messages are turned into typed [`Command`]s by [`parse`]. The grammar
//! is a fixed set of verb-first commands with positional arguments:
//!
//! ```text
//! build    <app> <branch>
//! deploy   <app> <build#> <qa|uat|prod>
//! status   <app>
//! rollback <app> <qa|uat|prod>
//! history  <app>
//! help
//! ```
//!
//! Parsing is pure: it never touches the network, the clock or any shared
//! state. Every [`Command`] renders back to canonical text through its
//! `Display` implementation, and parsing that text yields the same command.
//!
//! # Example
//!
//! ```
//! use gantry_command::{parse, BuildNumber, Command, Environment};
//!
//! let command = parse("<at>Gantry</at> DEPLOY myapp #42 UAT").unwrap();
//! assert_eq!(
//!     command,
//!     Command::Deploy {
//!         app: "myapp".to_owned(),
//!         build: BuildNumber::new(42).unwrap(),
//!         environment: Environment::Uat,
//!     }
//! );
//! assert_eq!(command.to_string(), "deploy myapp 42 uat");
//! ```

#![forbid(unsafe_code)]

mod command;
mod error;
mod parser;

pub use command::{BuildNumber, Command, Environment, Verb};
pub use error::ParseError;
pub use parser::{parse, strip_mentions};
