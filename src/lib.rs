//! JavaScript evaluation as an MCP tool, backed by a WASI sandbox.
//!
//! A precompiled JavaScript engine (a WASI preview1 module) is loaded and
//! compiled once at startup. Each `eval-js` call runs the source text
//! through a fresh, isolated instance of that engine with a memory ceiling
//! and a deadline, and returns either the JSON value it printed or a
//! `{code, message}` error.

pub mod config;
pub mod mcp;
pub mod sandbox;
pub mod tools;

#[cfg(test)]
mod testing;
