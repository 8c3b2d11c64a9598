#![doc = include_str!("../README.md")]
#![deny(unsafe_code, missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod packet;
pub mod role;
pub mod session;
pub mod token;
pub mod transport;
