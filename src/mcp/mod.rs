//! MCP Server module for exposing clinic-router to AI assistants.
//!
//! This module provides an MCP (Model Context Protocol) server that lets an
//! assistant drive patient conversations turn by turn.

pub mod server;

pub use server::ClinicRouterServer;
