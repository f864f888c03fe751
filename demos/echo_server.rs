//! Line-delimited echo server.
//!
//! Run with `cargo run --example echo_server`, then:
//!
//! ```text
//! $ nc 127.0.0.1 7777
//! hello
//! hello
//! ```

use std::collections::VecDeque;
use std::rc::Rc;

use octopod::prelude::*;

/// One command per newline-terminated line, delimiter included.
struct LineProtocol;

impl Protocol for LineProtocol {
    fn decode(
        &mut self,
        input: &mut RingBuffer,
        output: &mut VecDeque<CommandRef>,
    ) -> Result<()> {
        while let Some(pos) = input.find_byte(b'\n') {
            let mut line = Vec::with_capacity(pos + 1);
            input.read_into_vec(&mut line, pos + 1);
            output.push_back(Rc::new(line) as CommandRef);
        }
        Ok(())
    }

    fn encode(&mut self, cmd: &dyn Command, output: &mut RingBuffer) -> Result<()> {
        let line = cmd
            .downcast_ref::<Vec<u8>>()
            .ok_or_else(|| Error::Encode("expected a line command".into()))?;
        output.write(line)
    }
}

struct EchoProcessor;

impl Processor for EchoProcessor {
    fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef> {
        Some(cmd.clone())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut server = Server::new()?;
    server.register_protocol_factory("echo", || Box::new(LineProtocol))?;
    server.register_processor_factory("echo", || Box::new(EchoProcessor))?;

    let bound = server.add_listening_socket("127.0.0.1", 7777, "echo")?;
    server.set_worker_count(4);

    println!("echo server listening on {:?}", bound);
    server.start()
}
