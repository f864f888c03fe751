//! The server orchestrator: factory registries, listening sockets, the
//! acceptor reactor, and the worker pool wiring.
//!
//! A server is configured single-threaded (register factories, add
//! listening sockets, set the worker count) and then [`Server::start`]
//! runs the acceptor reactor until [`Server::stop`] (or a
//! [`ShutdownHandle`] from another thread) halts it. Registries are
//! read-only once the server runs.
//!
//! ```no_run
//! use octopod::{Server, Result};
//! # use octopod::{Protocol, Processor, RingBuffer, CommandRef, Command};
//! # use std::collections::VecDeque;
//! # struct LineProtocol;
//! # impl Protocol for LineProtocol {
//! #     fn decode(&mut self, _: &mut RingBuffer, _: &mut VecDeque<CommandRef>) -> Result<()> { Ok(()) }
//! #     fn encode(&mut self, _: &dyn Command, _: &mut RingBuffer) -> Result<()> { Ok(()) }
//! # }
//! # struct EchoProcessor;
//! # impl Processor for EchoProcessor {
//! #     fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef> { Some(cmd.clone()) }
//! # }
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

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use socket2::{Domain, SockRef, Socket, TcpKeepalive, Type};

use crate::config::ServerConfig;
use crate::connection::{self, AcceptedConn};
use crate::error::{Error, Result};
use crate::protocol::{Processor, ProcessorFactory, Protocol, ProtocolFactory};
use crate::reactor::{EventSink, Reactor, ReactorHandle, ShutdownHandle};
use crate::worker::IoWorkerPool;

/// State the accept path needs after configuration has finished.
struct ServerShared {
    config: ServerConfig,
    pool: RefCell<Option<IoWorkerPool>>,
}

pub struct Server {
    reactor: Reactor,
    shared: Rc<ServerShared>,
    protocol_factories: HashMap<String, ProtocolFactory>,
    processor_factories: HashMap<String, ProcessorFactory>,
    listener_count: usize,
    worker_count: usize,
}

impl Server {
    pub fn new() -> Result<Self> {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Result<Self> {
        Ok(Server {
            reactor: Reactor::new()?,
            shared: Rc::new(ServerShared {
                config,
                pool: RefCell::new(None),
            }),
            protocol_factories: HashMap::new(),
            processor_factories: HashMap::new(),
            listener_count: 0,
            worker_count: 0,
        })
    }

    /// Number of I/O workers to shard connections across. Zero (the
    /// default) keeps every connection on the acceptor's own reactor.
    /// Takes effect when [`start`](Self::start) spawns the pool.
    pub fn set_worker_count(&mut self, count: usize) {
        self.worker_count = count;
    }

    /// Registers the codec factory for `name`. Insert-once.
    pub fn register_protocol_factory<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Protocol> + Send + Sync + 'static,
    {
        if self.protocol_factories.contains_key(name) {
            return Err(Error::DuplicateFactory(name.to_owned()));
        }
        self.protocol_factories
            .insert(name.to_owned(), Arc::new(factory));
        Ok(())
    }

    /// Registers the processor factory for `name`. Insert-once.
    pub fn register_processor_factory<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        if self.processor_factories.contains_key(name) {
            return Err(Error::DuplicateFactory(name.to_owned()));
        }
        self.processor_factories
            .insert(name.to_owned(), Arc::new(factory));
        Ok(())
    }

    /// Binds one listening socket per address `host:port` resolves to and
    /// arms it for accept, serving the named protocol. Both factories must
    /// already be registered. Returns the bound local addresses.
    pub fn add_listening_socket(
        &mut self,
        host: &str,
        port: u16,
        protocol_name: &str,
    ) -> Result<Vec<SocketAddr>> {
        let protocol_factory = self
            .protocol_factories
            .get(protocol_name)
            .cloned()
            .ok_or_else(|| Error::UnknownProtocol(protocol_name.to_owned()))?;
        let processor_factory = self
            .processor_factories
            .get(protocol_name)
            .cloned()
            .ok_or_else(|| Error::UnknownProtocol(protocol_name.to_owned()))?;

        let mut bound = Vec::new();
        for addr in (host, port).to_socket_addrs()? {
            match self.bind_listener(addr, protocol_factory.clone(), processor_factory.clone()) {
                Ok(local) => bound.push(local),
                Err(e) => error!("failed to bind {}: {}", addr, e),
            }
        }

        if bound.is_empty() {
            return Err(Error::NoListeners);
        }
        info!("{} sockets added for {}:{}", bound.len(), host, port);
        self.listener_count += bound.len();
        Ok(bound)
    }

    fn bind_listener(
        &mut self,
        addr: SocketAddr,
        protocol_factory: ProtocolFactory,
        processor_factory: ProcessorFactory,
    ) -> Result<SocketAddr> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_keepalive(true)?;
        socket.set_tcp_nodelay(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.shared.config.backlog)?;
        socket.set_nonblocking(true)?;

        let mut listener = TcpListener::from_std(socket.into());
        let local = listener.local_addr()?;
        let token = Token(listener.as_raw_fd() as usize);

        let handle = self.reactor.handle();
        handle.register(&mut listener, token, Interest::READABLE)?;
        handle.attach(
            token,
            Rc::new(RefCell::new(ListenerSink {
                listener,
                protocol_factory,
                processor_factory,
                shared: self.shared.clone(),
            })),
        );

        debug!("listening on {}", local);
        Ok(local)
    }

    /// Runs the acceptor reactor until stopped. Spawns the worker pool
    /// first if a worker count was configured, and tears it down (stop plus
    /// join) when the loop exits.
    pub fn start(&mut self) -> Result<()> {
        if self.processor_factories.is_empty() {
            error!("no processor factory registered, refusing to start");
            return Err(Error::NoProcessors);
        }
        if self.listener_count == 0 {
            error!("no listening socket added, server will stop...");
            return Err(Error::NoListeners);
        }

        if self.worker_count > 0 {
            let pool = IoWorkerPool::spawn(self.worker_count, self.shared.config.buffer_size)?;
            info!("sharding connections across {} io workers", pool.len());
            *self.shared.pool.borrow_mut() = Some(pool);
        }

        info!("server starts to run...");
        let outcome = self.reactor.run();

        if let Some(pool) = self.shared.pool.borrow_mut().take() {
            pool.stop();
        }
        outcome
    }

    /// Stops the acceptor reactor; [`start`](Self::start) then unwinds and
    /// stops the worker pool.
    pub fn stop(&self) {
        self.reactor.shutdown_handle().shutdown();
    }

    /// A `Send` handle for stopping the server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }
}

/// Accept-side sink: one per listening socket, bound to the factory pair
/// registered for that socket's protocol name.
struct ListenerSink {
    listener: TcpListener,
    protocol_factory: ProtocolFactory,
    processor_factory: ProcessorFactory,
    shared: Rc<ServerShared>,
}

impl ListenerSink {
    fn admit(&self, reactor: &ReactorHandle, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let local = stream.local_addr()?;
        let fd = stream.as_raw_fd();
        let config = &self.shared.config;

        if let Err(e) = stream.set_nodelay(config.no_delay) {
            warn!("failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        if let Some(idle) = config.keep_alive {
            let keepalive = TcpKeepalive::new().with_time(idle);
            if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                warn!("failed to set keepalive for {}: {}", peer, e);
            }
        }

        trace!("new connection at {}, peer: {}", local, peer);
        let accepted = AcceptedConn {
            stream,
            peer,
            local,
            protocol: (self.protocol_factory)(),
            processor: (self.processor_factory)(),
        };

        match self.shared.pool.borrow().as_ref() {
            Some(pool) => pool.assign(fd, accepted),
            None => connection::install(reactor, accepted, config.buffer_size),
        }
    }
}

impl EventSink for ListenerSink {
    fn ready(&mut self, reactor: &ReactorHandle, event: &Event) {
        if !event.is_readable() {
            return;
        }

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // A failed setup destroys the partial connection (drop);
                    // the listening socket stays armed.
                    if let Err(e) = self.admit(reactor, stream, peer) {
                        error!("failed to set up connection from {}: {}", peer, e);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept error: {}", e);
                    break;
                }
            }
        }
    }
}
