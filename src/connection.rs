//! Per-connection state and the decode → process → encode pipeline.
//!
//! A [`Connection`] is built from the pieces accepted by the listener, is
//! registered on exactly one reactor, and every callback for it runs on
//! that reactor's thread for its entire life. Dropping the connection
//! releases the protocol, the processor, every still-queued command, and
//! closes the socket.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;

use log::{debug, error, trace};
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::buffer::{RingBuffer, Transfer};
use crate::error::Result;
use crate::protocol::{CommandRef, Processor, Protocol};
use crate::reactor::{EventSink, ReactorHandle};

/// Upper bound on bytes moved per socket read.
pub(crate) const READ_UNIT_BYTES: usize = 1024;
/// Upper bound on bytes moved per socket write.
pub(crate) const WRITE_UNIT_BYTES: usize = 1024;

/// Everything needed to build a [`Connection`], bundled by the acceptor and
/// handed to an I/O worker exactly once.
pub(crate) struct AcceptedConn {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub local: SocketAddr,
    pub protocol: Box<dyn Protocol>,
    pub processor: Box<dyn Processor>,
}

/// Builds a connection from `accepted` and registers it for read interest
/// on the given reactor.
pub(crate) fn install(
    reactor: &ReactorHandle,
    accepted: AcceptedConn,
    buffer_size: usize,
) -> Result<()> {
    let token = Token(accepted.stream.as_raw_fd() as usize);
    let mut conn = Connection::new(accepted, buffer_size, token);

    reactor.register(&mut conn.stream, token, Interest::READABLE)?;
    trace!("registered connection {} as {:?}", conn.peer, token);
    reactor.attach(token, Rc::new(RefCell::new(conn)));
    Ok(())
}

pub(crate) struct Connection {
    stream: TcpStream,
    token: Token,
    peer: SocketAddr,
    #[allow(dead_code)]
    local: SocketAddr,
    inbuf: RingBuffer,
    outbuf: RingBuffer,
    pending: VecDeque<CommandRef>,
    protocol: Box<dyn Protocol>,
    processor: Box<dyn Processor>,
    /// Whether write interest is currently registered.
    writing: bool,
}

impl Connection {
    fn new(accepted: AcceptedConn, buffer_size: usize, token: Token) -> Self {
        Connection {
            stream: accepted.stream,
            token,
            peer: accepted.peer,
            local: accepted.local,
            inbuf: RingBuffer::new(buffer_size),
            outbuf: RingBuffer::new(buffer_size),
            pending: VecDeque::new(),
            protocol: accepted.protocol,
            processor: accepted.processor,
            writing: false,
        }
    }

    /// Tears the connection down: deregisters the socket and drops the
    /// reactor's reference. The connection object itself (and with it the
    /// protocol, processor, queued commands and the descriptor) is released
    /// when the current dispatch finishes.
    fn destroy(&mut self, reactor: &ReactorHandle) {
        debug!("closing connection {}", self.peer);
        if let Err(e) = reactor.deregister(&mut self.stream) {
            error!("failed to deregister {}: {}", self.peer, e);
        }
        reactor.detach(self.token);
        self.pending.clear();
    }

    /// Read-side callback. Returns `false` if the connection was destroyed.
    fn handle_read(&mut self, reactor: &ReactorHandle) -> bool {
        loop {
            let unit = READ_UNIT_BYTES.min(self.inbuf.remaining());
            if unit == 0 {
                // Input ring is full and no complete unit was decodable; no
                // forward progress until the decoder consumes something.
                debug!("input buffer full for {}, backpressure", self.peer);
                return true;
            }

            match self.inbuf.fill_from(&mut self.stream, unit) {
                Ok(Transfer::WouldBlock) => return true,
                Ok(Transfer::Closed) => {
                    trace!("peer closed, connection: {}", self.peer);
                    self.destroy(reactor);
                    return false;
                }
                Ok(Transfer::Reset) => {
                    debug!("connection reset by peer: {}", self.peer);
                    self.destroy(reactor);
                    return false;
                }
                Err(e) => {
                    error!("read error on {}: {}", self.peer, e);
                    self.destroy(reactor);
                    return false;
                }
                Ok(Transfer::Bytes(n)) => {
                    trace!("read {} bytes from {}", n, self.peer);
                    if let Err(e) = self.protocol.decode(&mut self.inbuf, &mut self.pending) {
                        error!(
                            "failed to decode, connection will be closed, peer: {}, error: {}",
                            self.peer, e
                        );
                        self.destroy(reactor);
                        return false;
                    }

                    drain_pending(
                        self.protocol.as_mut(),
                        self.processor.as_mut(),
                        &mut self.pending,
                        &mut self.outbuf,
                        self.peer,
                    );

                    if !self.outbuf.is_empty() {
                        self.enable_write(reactor);
                    }
                }
            }
        }
    }

    /// Write-side callback. Returns `false` if the connection was destroyed.
    fn handle_write(&mut self, reactor: &ReactorHandle) -> bool {
        while !self.outbuf.is_empty() {
            let unit = WRITE_UNIT_BYTES.min(self.outbuf.len());
            match self.outbuf.drain_to(&mut self.stream, unit) {
                Ok(Transfer::Bytes(n)) => {
                    if n < unit {
                        // Socket send buffer is full; wait for the next
                        // writable notification.
                        return true;
                    }
                }
                Ok(Transfer::WouldBlock) => return true,
                Ok(Transfer::Reset) | Ok(Transfer::Closed) => {
                    debug!("connection reset while writing, peer: {}", self.peer);
                    self.destroy(reactor);
                    return false;
                }
                Err(e) => {
                    error!("write error on {}: {}", self.peer, e);
                    self.destroy(reactor);
                    return false;
                }
            }
        }

        // Output fully drained: write interest is only held while there is
        // pending output.
        if self.writing {
            self.disable_write(reactor);
        }
        true
    }

    fn enable_write(&mut self, reactor: &ReactorHandle) {
        if self.writing {
            return;
        }
        match reactor.reregister(
            &mut self.stream,
            self.token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            Ok(()) => self.writing = true,
            Err(e) => error!("failed to add write interest for {}: {}", self.peer, e),
        }
    }

    fn disable_write(&mut self, reactor: &ReactorHandle) {
        match reactor.reregister(&mut self.stream, self.token, Interest::READABLE) {
            Ok(()) => self.writing = false,
            Err(e) => error!("failed to drop write interest for {}: {}", self.peer, e),
        }
    }
}

impl EventSink for Connection {
    fn ready(&mut self, reactor: &ReactorHandle, event: &Event) {
        if event.is_readable() && !self.handle_read(reactor) {
            return;
        }
        if event.is_writable() {
            self.handle_write(reactor);
        }
    }
}

/// Runs every pending command through the processor and encoder, in arrival
/// order. Popping the queue moves its reference into the call; the handle
/// is released when the iteration for that command ends.
///
/// A `None` process result and a failed encode each drop that single
/// response and keep going; neither aborts the connection.
fn drain_pending(
    protocol: &mut dyn Protocol,
    processor: &mut dyn Processor,
    pending: &mut VecDeque<CommandRef>,
    outbuf: &mut RingBuffer,
    peer: SocketAddr,
) {
    while let Some(cmd) = pending.pop_front() {
        let result = match processor.process(&cmd) {
            Some(result) => result,
            None => {
                debug!("no response for command, peer: {}", peer);
                continue;
            }
        };

        if let Err(e) = protocol.encode(result.as_ref(), outbuf) {
            error!("failed to encode command, peer: {}, error: {}", peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::Command;
    use std::cell::Cell;

    struct Item(u8);

    /// Encodes `Item` bytes verbatim; fails on 0xff.
    struct ByteProto;

    impl Protocol for ByteProto {
        fn decode(
            &mut self,
            _input: &mut RingBuffer,
            _output: &mut VecDeque<CommandRef>,
        ) -> Result<()> {
            Ok(())
        }

        fn encode(&mut self, cmd: &dyn Command, output: &mut RingBuffer) -> Result<()> {
            let item = cmd.downcast_ref::<Item>().expect("item command");
            if item.0 == 0xff {
                return Err(Error::Encode("unencodable".into()));
            }
            output.write(&[item.0])?;
            Ok(())
        }
    }

    /// Echoes the input command; swallows 0x00.
    struct EchoOrSwallow;

    impl Processor for EchoOrSwallow {
        fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef> {
            let item = cmd.downcast_ref::<Item>().expect("item command");
            if item.0 == 0x00 {
                None
            } else {
                Some(cmd.clone())
            }
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn responses_keep_arrival_order() {
        let mut pending: VecDeque<CommandRef> = VecDeque::new();
        for b in [1u8, 2, 3] {
            pending.push_back(Rc::new(Item(b)));
        }
        let mut outbuf = RingBuffer::new(16);

        drain_pending(
            &mut ByteProto,
            &mut EchoOrSwallow,
            &mut pending,
            &mut outbuf,
            addr(),
        );

        let mut out = [0u8; 16];
        let n = outbuf.read_to(&mut out);
        assert_eq!(&out[..n], &[1, 2, 3]);
        assert!(pending.is_empty());
    }

    #[test]
    fn null_result_skips_but_consumes_command() {
        let drops = Rc::new(Cell::new(0u32));

        struct Tracked(u8, Rc<Cell<u32>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.1.set(self.1.get() + 1);
            }
        }

        struct TrackedProc;
        impl Processor for TrackedProc {
            fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef> {
                let t = cmd.downcast_ref::<Tracked>().unwrap();
                if t.0 == 0 {
                    None
                } else {
                    Some(Rc::new(Item(t.0)))
                }
            }
        }

        let mut pending: VecDeque<CommandRef> = VecDeque::new();
        pending.push_back(Rc::new(Tracked(0, drops.clone())));
        pending.push_back(Rc::new(Tracked(9, drops.clone())));
        let mut outbuf = RingBuffer::new(16);

        drain_pending(
            &mut ByteProto,
            &mut TrackedProc,
            &mut pending,
            &mut outbuf,
            addr(),
        );

        // Both inputs released exactly once, only the second produced bytes.
        assert_eq!(drops.get(), 2);
        let mut out = [0u8; 4];
        assert_eq!(outbuf.read_to(&mut out), 1);
        assert_eq!(out[0], 9);
    }

    #[test]
    fn encode_failure_drops_one_response_and_continues() {
        let mut pending: VecDeque<CommandRef> = VecDeque::new();
        for b in [5u8, 0xff, 7] {
            pending.push_back(Rc::new(Item(b)));
        }
        let mut outbuf = RingBuffer::new(16);

        drain_pending(
            &mut ByteProto,
            &mut EchoOrSwallow,
            &mut pending,
            &mut outbuf,
            addr(),
        );

        let mut out = [0u8; 4];
        let n = outbuf.read_to(&mut out);
        assert_eq!(&out[..n], &[5, 7]);
    }
}
