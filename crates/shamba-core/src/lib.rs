//! # shamba-core
//!
//! Core types, configuration, error handling, phone normalization, and inbound
//! message classification for the Shamba SMS engine.

pub mod classify;
pub mod config;
pub mod error;
pub mod message;
pub mod phone;

pub use error::ShambaError;
pub use phone::PhoneNumber;
