//! Single-threaded readiness-notification event loop over [`mio`].
//!
//! One [`Reactor`] runs on exactly one thread and dispatches readable /
//! writable events to the [`EventSink`]s attached to it. All sinks on a
//! reactor share that thread, so they hold cheap single-thread state
//! (`Rc`, `RefCell`) and need no locks. The only operations that cross
//! threads are [`ShutdownHandle::shutdown`] and [`Reactor::waker`]-driven
//! nudges; both go through the mio [`Waker`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Registry, Token, Waker};

use crate::error::Result;

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Token reserved for the reactor's own waker.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Receives readiness events for one registered descriptor.
pub trait EventSink {
    /// Invoked on the reactor thread when the descriptor becomes ready.
    /// A sink may attach or detach sinks (including itself) from within.
    fn ready(&mut self, reactor: &ReactorHandle, event: &Event);
}

type SinkMap = Rc<RefCell<HashMap<Token, Rc<RefCell<dyn EventSink>>>>>;

/// Clonable, thread-local face of a [`Reactor`], passed into every
/// [`EventSink::ready`] call so sinks can (de)register descriptors and
/// attach further sinks.
#[derive(Clone)]
pub struct ReactorHandle {
    registry: Rc<Registry>,
    sinks: SinkMap,
}

impl ReactorHandle {
    pub fn register<S>(&self, source: &mut S, token: Token, interests: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.registry.register(source, token, interests)
    }

    pub fn reregister<S>(&self, source: &mut S, token: Token, interests: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.registry.reregister(source, token, interests)
    }

    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.registry.deregister(source)
    }

    /// Associates `sink` with `token`. Events for the token are dispatched
    /// to the sink until it is detached.
    pub fn attach(&self, token: Token, sink: Rc<RefCell<dyn EventSink>>) {
        self.sinks.borrow_mut().insert(token, sink);
    }

    /// Removes the sink for `token`, releasing the reactor's reference.
    pub fn detach(&self, token: Token) -> Option<Rc<RefCell<dyn EventSink>>> {
        self.sinks.borrow_mut().remove(&token)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.borrow().len()
    }
}

/// Signals a running reactor to stop. Safe to use from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake reactor for shutdown: {}", e);
        }
    }
}

pub struct Reactor {
    poll: Poll,
    handle: ReactorHandle,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let registry = Rc::new(poll.registry().try_clone()?);

        Ok(Reactor {
            poll,
            handle: ReactorHandle {
                registry,
                sinks: Rc::new(RefCell::new(HashMap::new())),
            },
            waker,
            // Armed at construction so a shutdown that lands before the
            // loop starts is not lost.
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Waker for nudging the loop from another thread without stopping it.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Runs the event loop until [`ShutdownHandle::shutdown`] is called.
    pub fn run(&mut self) -> Result<()> {
        self.run_with(|_| {})
    }

    /// Runs the event loop, invoking `on_wake` each time the waker fires.
    /// Used by I/O workers to drain their cross-thread inbox.
    pub fn run_with<F>(&mut self, mut on_wake: F) -> Result<()>
    where
        F: FnMut(&ReactorHandle),
    {
        let mut events = Events::with_capacity(DEFAULT_EVENTS_CAPACITY);
        let timeout = Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS);

        while self.running.load(Ordering::SeqCst) {
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    on_wake(&self.handle);
                    continue;
                }
                self.dispatch(event);
            }
        }

        Ok(())
    }

    fn dispatch(&self, event: &Event) {
        // Clone the sink out so a callback can detach itself (or attach
        // others) without holding a borrow of the map.
        let sink = self.handle.sinks.borrow().get(&event.token()).cloned();
        if let Some(sink) = sink {
            sink.borrow_mut().ready(&self.handle, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct NoopSink;

    impl EventSink for NoopSink {
        fn ready(&mut self, _reactor: &ReactorHandle, _event: &Event) {}
    }

    #[test]
    fn stop_from_another_thread() {
        let mut reactor = Reactor::new().unwrap();
        let stop = reactor.shutdown_handle();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.shutdown();
        });

        reactor.run().unwrap();
        stopper.join().unwrap();
    }

    #[test]
    fn waker_invokes_on_wake() {
        let mut reactor = Reactor::new().unwrap();
        let stop = reactor.shutdown_handle();
        let waker = reactor.waker();

        let nudger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake().unwrap();
            thread::sleep(Duration::from_millis(50));
            stop.shutdown();
        });

        let mut woke = false;
        reactor.run_with(|_| woke = true).unwrap();
        nudger.join().unwrap();
        assert!(woke);
    }

    #[test]
    fn attach_detach_tracks_sinks() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();

        handle.attach(Token(7), Rc::new(RefCell::new(NoopSink)));
        assert_eq!(handle.sink_count(), 1);
        assert!(handle.detach(Token(7)).is_some());
        assert!(handle.detach(Token(7)).is_none());
        assert_eq!(handle.sink_count(), 0);
    }
}
