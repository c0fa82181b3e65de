pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod kind;
pub mod recording;
pub mod sensors;
pub mod storage;
