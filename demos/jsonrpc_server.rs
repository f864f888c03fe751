//! Newline-delimited JSON RPC server.
//!
//! Each request is one JSON object on its own line; each reply comes back
//! the same way. Run with `cargo run --example jsonrpc_server`, then:
//!
//! ```text
//! $ nc 127.0.0.1 8080
//! {"Add":{"a":5,"b":3}}
//! {"Sum":{"result":8}}
//! {"Echo":{"message":"hello"}}
//! {"Echo":{"message":"hello"}}
//! ```

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use octopod::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub enum RpcRequest {
    Ping,
    Echo { message: String },
    Add { a: i32, b: i32 },
    GetTime,
    SetValue { key: String, value: String },
    GetValue { key: String },
    ListKeys,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum RpcResponse {
    Pong,
    Echo { message: String },
    Sum { result: i32 },
    Time { timestamp: u64 },
    ValueSet { key: String },
    Value { key: String, value: Option<String> },
    Keys { keys: Vec<String> },
    Error { message: String },
}

/// Commands carry the decoded request on the way in and the reply on the
/// way out.
enum RpcCommand {
    Request(RpcRequest),
    Response(RpcResponse),
}

struct JsonLineProtocol;

impl Protocol for JsonLineProtocol {
    fn decode(
        &mut self,
        input: &mut RingBuffer,
        output: &mut VecDeque<CommandRef>,
    ) -> Result<()> {
        while let Some(pos) = input.find_byte(b'\n') {
            let mut line = Vec::with_capacity(pos + 1);
            input.read_into_vec(&mut line, pos + 1);
            let request: RpcRequest = serde_json::from_slice(&line)
                .map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))?;
            output.push_back(Rc::new(RpcCommand::Request(request)) as CommandRef);
        }
        Ok(())
    }

    fn encode(&mut self, cmd: &dyn Command, output: &mut RingBuffer) -> Result<()> {
        let response = match cmd.downcast_ref::<RpcCommand>() {
            Some(RpcCommand::Response(response)) => response,
            _ => return Err(Error::Encode("expected an RPC response".into())),
        };
        let mut line = serde_json::to_vec(response)
            .map_err(|e| Error::Encode(format!("serialization failed: {}", e)))?;
        line.push(b'\n');
        output.write(&line)
    }
}

/// Per-connection processor; the key-value store lives with the connection.
#[derive(Default)]
struct RpcProcessor {
    data_store: HashMap<String, String>,
}

impl RpcProcessor {
    fn respond(&mut self, request: &RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::Ping => RpcResponse::Pong,

            RpcRequest::Echo { message } => RpcResponse::Echo {
                message: message.clone(),
            },

            RpcRequest::Add { a, b } => RpcResponse::Sum { result: a + b },

            RpcRequest::GetTime => RpcResponse::Time {
                timestamp: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            },

            RpcRequest::SetValue { key, value } => {
                self.data_store.insert(key.clone(), value.clone());
                RpcResponse::ValueSet { key: key.clone() }
            }

            RpcRequest::GetValue { key } => RpcResponse::Value {
                key: key.clone(),
                value: self.data_store.get(key).cloned(),
            },

            RpcRequest::ListKeys => RpcResponse::Keys {
                keys: self.data_store.keys().cloned().collect(),
            },
        }
    }
}

impl Processor for RpcProcessor {
    fn process(&mut self, cmd: &CommandRef) -> Option<CommandRef> {
        let response = match cmd.downcast_ref::<RpcCommand>() {
            Some(RpcCommand::Request(request)) => self.respond(request),
            _ => RpcResponse::Error {
                message: "unexpected command".into(),
            },
        };
        Some(Rc::new(RpcCommand::Response(response)) as CommandRef)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut server = Server::new()?;
    server.register_protocol_factory("jsonrpc", || Box::new(JsonLineProtocol))?;
    server.register_processor_factory("jsonrpc", || Box::new(RpcProcessor::default()))?;

    let bound = server.add_listening_socket("127.0.0.1", 8080, "jsonrpc")?;
    server.set_worker_count(2);

    println!("RPC server listening on {:?}", bound);
    println!("Available RPC methods:");
    println!("  \"Ping\"                                     - Simple ping/pong");
    println!("  {{\"Echo\":{{\"message\":\"hello\"}}}}              - Echo a message");
    println!("  {{\"Add\":{{\"a\":5,\"b\":3}}}}                    - Add two numbers");
    println!("  \"GetTime\"                                  - Current timestamp");
    println!("  {{\"SetValue\":{{\"key\":\"k\",\"value\":\"v\"}}}}     - Set key-value");
    println!("  {{\"GetValue\":{{\"key\":\"k\"}}}}                  - Get value by key");
    println!("  \"ListKeys\"                                 - List all keys");
    println!();

    server.start()
}
