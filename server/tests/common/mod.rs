//! Shared harness for the end-to-end tests: a background server runner, a
//! test protocol, and port allocation.

#![allow(dead_code)]

use protomux_proto::{protocol, subprotocol};
use protomux_server::{control_channel, run_server, Module, Options, ServerHandle};
use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use std::thread::JoinHandle;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simple {
    pub timestamp: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type1 {
    pub data: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type4 {
    pub data: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type6 {
    pub data: String,
}

protocol! {
    pub proto TestProto { Simple, Type1, Type4, Type6 }
}

subprotocol! {
    pub proto Type6Only : TestProto { Type6 }
}

/// Grab a free localhost port.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind for port probe");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// A module server running on a background thread until dropped.
pub struct Runner {
    handle: ServerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Runner {
    /// Start a module server on a background thread. The factory runs on
    /// that thread, so modules may hold thread-local state.
    pub fn start<M: Module>(factory: impl FnOnce() -> M + Send + 'static, port: u16) -> Self {
        Self::start_with_options(factory, {
            let mut opts = Options::new();
            opts.insert("Port".into(), port.to_string());
            opts
        })
    }

    pub fn start_with_options<M: Module>(
        factory: impl FnOnce() -> M + Send + 'static,
        opts: Options,
    ) -> Self {
        let (handle, ctrl) = control_channel();
        let thread = std::thread::spawn(move || {
            run_server(factory(), &opts, ctrl).expect("server run failed");
        });
        Self {
            handle,
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn stop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.stop();
    }
}
