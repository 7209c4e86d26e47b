pub mod adapter;
pub mod buffer;
pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod router;
