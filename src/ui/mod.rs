//! Full-screen terminal front-end: login and signup forms, and the chat
//! screen with its conversation sidebar.

pub mod app;
pub mod chat_loop;
pub mod forms;
pub mod lifecycle;
pub mod render;

pub use chat_loop::run_chat;
