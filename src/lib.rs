//! EESYAI is a terminal chat client for a remote assistant that streams its
//! replies as plain text.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversation state, persistence, the streamed-response
//!   consumer and the per-send chat controller.
//! - [`auth`] holds the session context and decides which screen a user may
//!   see (login, signup or the chat itself).
//! - [`api`] defines the wire payloads and HTTP calls for the authentication
//!   and completion endpoints.
//! - [`ui`] renders the terminal interface and runs the interactive event
//!   loop.
//! - [`cli`] parses arguments and wires the layers together for each
//!   command.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod ui;
pub mod utils;
