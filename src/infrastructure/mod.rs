//! Adapters for the domain ports

pub mod bus;
pub mod cache;
pub mod crypto;
pub mod http;
pub mod repository;
