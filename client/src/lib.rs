//! Blocking, protocol-typed client.
//!
//! The synchronous counterpart to the reactor: each [`ProtoClient`] owns
//! its socket and read loop, so tests and benches can drive a server from
//! plain threads with no runtime of their own. Inbound frames are routed
//! to one-shot [`receive`](ProtoClient::receive) subscriptions first; the
//! rest are parked in a bounded ambient queue that
//! [`wait_message`](ProtoClient::wait_message) drains by type, so an
//! interleaved reply stream never drops unmatched frames.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use protomux_proto::{
    identify, log_rejected, Cancelled, Correlator, DecodeError, Delivery, EncodeError,
    InProtocol, ProtocolSpec,
};
use protomux_wire::{encode_header, peek_frame, RollingBuffer, WireError, MAX_FRAME_LEN};
use thiserror::Error;
use tracing::warn;

/// Frames parked for `wait_message` before the oldest is dropped.
const AMBIENT_LIMIT: usize = 1024;

const READ_BUF_INITIAL: usize = 2 * 1024;

/// Client-side failures.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Socket I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The inbound byte stream is not valid framing.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Outgoing payload could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// A waited-for payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

type ClientSub = Box<dyn for<'a> FnOnce(Delivery<'a>)>;

/// Blocking client speaking protocol `P`.
pub struct ProtoClient<P: ProtocolSpec> {
    stream: Option<TcpStream>,
    rbuf: RollingBuffer,
    correlator: Correlator<ClientSub>,
    ambient: VecDeque<(u16, Vec<u8>)>,
    _protocol: PhantomData<P>,
}

impl<P: ProtocolSpec> ProtoClient<P> {
    /// Create a disconnected client.
    pub fn new() -> Self {
        Self {
            stream: None,
            rbuf: RollingBuffer::with_capacity(READ_BUF_INITIAL),
            correlator: Correlator::new(),
            ambient: VecDeque::new(),
            _protocol: PhantomData,
        }
    }

    /// Connect to a server.
    pub fn connect(&mut self, addr: impl ToSocketAddrs) -> Result<(), ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Connect, retrying up to `attempts` times with a short pause.
    pub fn connect_retry(
        &mut self,
        addr: impl ToSocketAddrs + Clone,
        attempts: usize,
    ) -> Result<(), ClientError> {
        let mut last = None;
        for _ in 0..attempts {
            match self.connect(addr.clone()) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last = Some(err);
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
        Err(last.unwrap_or(ClientError::NotConnected))
    }

    /// Connect, retrying until the server appears.
    pub fn wait_connect(&mut self, addr: impl ToSocketAddrs + Clone) {
        while self.connect(addr.clone()).is_err() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// True while a connection is open.
    pub fn connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send a typed message under its canonical tag.
    pub fn send<T: InProtocol<P>>(&mut self, msg: &T) -> Result<(), ClientError> {
        let mut payload = Vec::new();
        msg.encode_to(&mut payload)?;
        self.send_raw(identify::<P, T>(), &payload)
    }

    /// Send pre-encoded payload bytes under an explicit tag.
    pub fn send_raw(&mut self, tag: u16, payload: &[u8]) -> Result<(), ClientError> {
        let header = encode_header(tag, payload.len())?;
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        stream.write_all(&header)?;
        stream.write_all(payload)?;
        Ok(())
    }

    /// Block until a message of type `T` arrives and return it.
    ///
    /// Frames of other types received in the meantime stay available for
    /// later waits.
    pub fn wait_message<T: InProtocol<P>>(&mut self) -> Result<T, ClientError> {
        loop {
            if let Some(msg) = self.take_ambient::<T>() {
                return Ok(msg);
            }
            self.read_some()?;
        }
    }

    /// Return a parked message of type `T`, or perform one read round and
    /// report `None`.
    pub fn try_receive<T: InProtocol<P>>(&mut self) -> Result<Option<T>, ClientError> {
        if let Some(msg) = self.take_ambient::<T>() {
            return Ok(Some(msg));
        }
        self.read_some()?;
        Ok(None)
    }

    /// Queue a one-shot subscription for the next message of type `T`.
    ///
    /// Subscribing while disconnected cancels immediately.
    pub fn receive<T, F>(&mut self, f: F)
    where
        T: InProtocol<P>,
        F: FnOnce(T, Result<(), Cancelled>) + 'static,
    {
        let tag = identify::<P, T>();
        let sub: ClientSub = Box::new(move |delivery| match delivery {
            Delivery::Frame(buf) => match T::decode(buf) {
                Ok(msg) => f(msg, Ok(())),
                Err(err) => {
                    log_rejected(tag, buf, &err);
                    f(T::default(), Err(Cancelled));
                }
            },
            Delivery::Cancelled => f(T::default(), Err(Cancelled)),
        });

        if self.stream.is_none() {
            sub(Delivery::Cancelled);
            return;
        }
        self.correlator.subscribe(tag, sub);
    }

    /// Read until every subscription has been resolved.
    pub fn run(&mut self) -> Result<(), ClientError> {
        while !self.correlator.done() {
            self.read_some()?;
        }
        Ok(())
    }

    /// Number of unresolved subscriptions.
    pub fn pending(&self) -> usize {
        self.correlator.pending()
    }

    /// True when no subscriptions are outstanding.
    pub fn done(&self) -> bool {
        self.correlator.done()
    }

    /// One blocking read; parses and routes every complete frame.
    pub fn read_some(&mut self) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        self.rbuf.ensure_writable();
        let n = stream.read(self.rbuf.writable_tail())?;
        if n == 0 {
            self.drop_connection();
            return Err(ClientError::Closed);
        }
        self.rbuf.commit(n);
        self.route_frames()
    }

    /// Close the connection; every pending subscription resolves as
    /// cancelled exactly once.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.cancel_all();
        self.rbuf.clear();
        self.ambient.clear();
    }

    fn route_frames(&mut self) -> Result<(), ClientError> {
        loop {
            // copy the frame out before touching any other client state
            let parsed = peek_frame(self.rbuf.readable(), MAX_FRAME_LEN)
                .map(|view| view.map(|v| (v.tag, v.payload.to_vec(), v.total_len)));
            let (tag, payload, total_len) = match parsed {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(err) => {
                    // the byte stream is no longer trustworthy
                    self.drop_connection();
                    return Err(err.into());
                }
            };
            self.rbuf.consume(total_len);

            match self.correlator.take(tag) {
                Some(sub) => sub(Delivery::Frame(&payload)),
                None => self.park_ambient(tag, payload),
            }
        }
    }

    fn park_ambient(&mut self, tag: u16, payload: Vec<u8>) {
        if self.ambient.len() == AMBIENT_LIMIT {
            let (dropped_tag, _) = self.ambient.pop_front().expect("ambient queue not empty");
            warn!("ambient queue full; dropping oldest frame (tag {})", dropped_tag);
        }
        self.ambient.push_back((tag, payload));
    }

    fn take_ambient<T: InProtocol<P>>(&mut self) -> Option<T> {
        let tag = identify::<P, T>();
        while let Some(pos) = self.ambient.iter().position(|(t, _)| *t == tag) {
            let (_, payload) = self.ambient.remove(pos).expect("position just found");
            match T::decode(&payload) {
                Ok(msg) => return Some(msg),
                Err(err) => log_rejected(tag, &payload, &err),
            }
        }
        None
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.cancel_all();
    }

    fn cancel_all(&mut self) {
        for sub in self.correlator.cancel() {
            sub(Delivery::Cancelled);
        }
    }
}

impl<P: ProtocolSpec> Default for ProtoClient<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProtocolSpec> Drop for ProtoClient<P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
