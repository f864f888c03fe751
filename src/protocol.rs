//! The wire-protocol boundary: commands, codecs, and processors.
//!
//! A concrete protocol plugs into the framework by supplying two
//! capabilities through zero-argument factories registered under a protocol
//! name:
//!
//! - a [`Protocol`] that decodes the input byte stream into commands and
//!   encodes result commands back into bytes, and
//! - a [`Processor`] that turns one decoded command into one response
//!   command.
//!
//! Both are instantiated per connection at accept time and live exactly as
//! long as the connection. Commands travel through the pipeline as
//! a [`CommandRef`], a single-thread counted shared handle whose payload is
//! released exactly once, when the last holder drops it. A component that
//! keeps a command beyond the call that produced it clones the handle first.

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::buffer::RingBuffer;
use crate::error::Result;

/// One decoded protocol unit flowing from decode through processing to
/// encode.
///
/// Blanket-implemented for every `'static` type, so plain structs (or even
/// `String`) can serve as commands. Resources owned by a command are
/// released by its `Drop` when the last [`CommandRef`] goes away.
pub trait Command: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> Command for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Command {
    /// Borrows the command as its concrete type, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }
}

/// Shared handle to a command. Cloning increments the count, dropping
/// decrements it; the command is destroyed on the transition to zero.
/// Commands never leave the thread that owns their connection.
pub type CommandRef = Rc<dyn Command>;

/// Byte stream ⇄ commands.
///
/// `Send` is required because the instance is created by the acceptor and
/// handed to an I/O worker exactly once; afterwards only the owning worker
/// thread touches it.
pub trait Protocol: Send {
    /// Decodes every complete unit available in `input`, appending one
    /// command per unit to `output` in arrival order. A trailing incomplete
    /// unit stays in the buffer for the next invocation.
    ///
    /// An error means the input is malformed and the connection will be
    /// destroyed.
    fn decode(&mut self, input: &mut RingBuffer, output: &mut VecDeque<CommandRef>) -> Result<()>;

    /// Serializes one result command into `output`.
    ///
    /// An error drops that single response; the connection stays alive.
    fn encode(&mut self, cmd: &dyn Command, output: &mut RingBuffer) -> Result<()>;
}

/// Command → response transformation.
pub trait Processor: Send {
    /// Processes one decoded command. `None` means there is nothing to
    /// encode for this input; the command is still consumed.
    fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef>;
}

/// Creates one [`Protocol`] instance per accepted connection.
pub type ProtocolFactory = Arc<dyn Fn() -> Box<dyn Protocol> + Send + Sync>;

/// Creates one [`Processor`] instance per accepted connection.
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Tracked {
        drops: Rc<Cell<u32>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn destroy_fires_once_at_last_release() {
        let drops = Rc::new(Cell::new(0));
        let cmd: CommandRef = Rc::new(Tracked {
            drops: drops.clone(),
        });

        let held = cmd.clone();
        let queued = cmd.clone();
        drop(cmd);
        assert_eq!(drops.get(), 0);
        drop(queued);
        assert_eq!(drops.get(), 0);
        drop(held);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn queue_drain_releases_every_command() {
        let drops = Rc::new(Cell::new(0));
        let mut pending: VecDeque<CommandRef> = VecDeque::new();
        for _ in 0..3 {
            pending.push_back(Rc::new(Tracked {
                drops: drops.clone(),
            }));
        }

        pending.clear();
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn downcast_to_concrete_command() {
        struct Ping(u32);
        let cmd: CommandRef = Rc::new(Ping(7));
        assert_eq!(cmd.downcast_ref::<Ping>().map(|p| p.0), Some(7));
        assert!(cmd.downcast_ref::<String>().is_none());
    }
}
