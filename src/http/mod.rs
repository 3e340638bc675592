//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the external API routing, buffered vs. streamed delivery, and
//! the standing stream endpoint.

pub mod handlers;
pub mod negotiate;
