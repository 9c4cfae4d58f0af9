pub mod chat_stream;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod message;
pub mod persistence;
pub mod storage;
pub mod store;
