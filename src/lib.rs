//! # Octopod
//! A protocol-agnostic, multi-threaded, non-blocking TCP server framework for Rust
//! that serves any request/response byte protocol without relying on heavyweight
//! async runtimes like Tokio.
//! Octopod is a modular, reactor-based framework built on top of [`mio`]: you supply
//! a codec (a [`Protocol`]) and application logic (a [`Processor`]), and the framework
//! handles sockets, buffering, event dispatch, and sharding connections across
//! worker threads.
//! ## Core Philosophy
//! Octopod was designed for servers that require:
//! - **Predictable performance** with minimal runtime overhead
//! - **Runtime-agnostic architecture** that doesn't force async/await patterns
//! - **Direct control** over concurrency and per-connection state
//! - **Pluggable protocols** decoded and encoded through a small trait pair
//! ## Features
//! - **Runtime-agnostic**: No dependency on Tokio or other async runtimes
//! - **Cross-platform polling**: Leverages mio's abstraction (epoll, kqueue)
//! - **Sharded I/O workers**: Each connection is pinned to one reactor thread,
//!   so per-connection state needs no locks
//! - **Ring-buffered pipelines**: Fixed-capacity input/output buffers with
//!   built-in backpressure
//! - **Clean API**: Register factories by name, bind sockets, run
//! ## Architecture Overview
//! ```text
//! ┌────────────┐    ┌──────────────┐    ┌────────────────┐
//! │  Server    │───▶│   Acceptor   │───▶│  IoWorkerPool  │
//! │ (registry) │    │   Reactor    │    │  (fd % N)      │
//! └────────────┘    └──────────────┘    └────────────────┘
//!                                                │
//!                                                ▼
//!                    ┌──────────────┐    ┌────────────────┐
//!                    │  Connection  │◀───│ Worker Reactor │
//!                    │ decode/      │    │  (one thread)  │
//!                    │ process/     │    └────────────────┘
//!                    │ encode       │
//!                    └──────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use octopod::prelude::*;
//! use std::collections::VecDeque;
//! use std::rc::Rc;
//!
//! // Frames are newline-delimited lines; the command is the line itself.
//! struct LineProtocol;
//!
//! impl Protocol for LineProtocol {
//!     fn decode(
//!         &mut self,
//!         input: &mut RingBuffer,
//!         output: &mut VecDeque<CommandRef>,
//!     ) -> Result<()> {
//!         while let Some(pos) = input.find_byte(b'\n') {
//!             let mut line = Vec::with_capacity(pos + 1);
//!             input.read_into_vec(&mut line, pos + 1);
//!             output.push_back(Rc::new(line) as CommandRef);
//!         }
//!         Ok(())
//!     }
//!
//!     fn encode(&mut self, cmd: &dyn Command, output: &mut RingBuffer) -> Result<()> {
//!         let line = cmd
//!             .downcast_ref::<Vec<u8>>()
//!             .ok_or_else(|| Error::Encode("unexpected command type".into()))?;
//!         output.write(line)
//!     }
//! }
//!
//! // Echo every command straight back.
//! struct EchoProcessor;
//!
//! impl Processor for EchoProcessor {
//!     fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef> {
//!         Some(cmd.clone())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let mut server = Server::new()?;
//!     server.register_protocol_factory("echo", || Box::new(LineProtocol))?;
//!     server.register_processor_factory("echo", || Box::new(EchoProcessor))?;
//!     server.add_listening_socket("127.0.0.1", 7777, "echo")?;
//!     server.set_worker_count(4);
//!     server.start() // blocks until stopped
//! }
//! ```
//!
//! - [`Server`]: Main entry point; registers factories, binds sockets, runs the acceptor
//! - [`Protocol`] / [`Processor`]: The two traits a protocol implementation provides
//! - [`RingBuffer`]: Fixed-capacity byte buffer used on both sides of a connection
//! - [`reactor`]: Core reactor managing poll, dispatch, and cross-thread wakeups
//! - [`error`]: Error types and result handling

pub mod buffer;
pub mod config;
pub(crate) mod connection;
pub mod error;
pub mod protocol;
pub mod reactor;
pub mod server;
pub(crate) mod worker;

pub use buffer::{RingBuffer, Transfer};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{Error, Result};
pub use protocol::{Command, CommandRef, Processor, Protocol};
pub use reactor::ShutdownHandle;
pub use server::Server;

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use octopod::prelude::*;
/// ```
///
/// This brings into scope:
/// - [`Server`] and [`ServerConfig`] - Setup and lifecycle
/// - [`Protocol`], [`Processor`], [`Command`], [`CommandRef`] - The protocol contract
/// - [`RingBuffer`] and [`Transfer`] - Buffering primitives for codec implementations
/// - [`Error`] and [`Result`] - Error handling
pub mod prelude {
    pub use crate::buffer::{RingBuffer, Transfer};
    pub use crate::config::{ServerConfig, ServerConfigBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{Command, CommandRef, Processor, Protocol};
    pub use crate::reactor::ShutdownHandle;
    pub use crate::server::Server;
}
