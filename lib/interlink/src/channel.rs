use crate::buffer::Buffer;
use crate::error::TransportError;
use crate::frame::{try_take_frame, write_frame};
use mio::net::TcpStream;
use slog::{debug, o, trace, Logger};
use std::net::Shutdown;
use std::time::Instant;

const WRITE_BUF_SIZE: usize = 8 * 65536;
const READ_BUF_SIZE: usize = 65536;

pub type ChannelId = usize;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    Handshake,
    Connected,
    Disconnected,
}

/// A single TCP connection's framing and buffering state (spec §4.4).
///
/// Grounded on `neutronium::net::channel::Channel`, minus the crypto layer:
/// the teacher encrypts every frame with a per-session key pair and a MAC
/// (`flux::crypto`); AtlasNet drops that (see DESIGN.md — cryptographic peer
/// verification is an explicit non-goal) and speaks the plain
/// `[type_id][length][payload]` frames from `frame.rs` directly.
pub struct Channel {
    id: Option<ChannelId>,
    stream: Option<TcpStream>,
    state: ChannelState,

    last_egress: Instant,
    last_ingress: Instant,

    read_buffer: Buffer,
    write_buffer: Buffer,

    log: Logger,
}

impl Channel {
    pub fn new(log: &Logger) -> Channel {
        let now = Instant::now();
        Channel {
            id: None,
            stream: None,
            state: ChannelState::Disconnected,
            last_egress: now,
            last_ingress: now,
            read_buffer: Buffer::new(READ_BUF_SIZE),
            write_buffer: Buffer::new(WRITE_BUF_SIZE),
            log: log.new(o!()),
        }
    }

    pub fn open(&mut self, id: ChannelId, stream: TcpStream, now: Instant) {
        if self.state != ChannelState::Disconnected {
            panic!("attempted to open an already open channel");
        }

        self.id = Some(id);
        self.state = ChannelState::Handshake;
        self.stream = Some(stream);
        self.last_egress = now;
        self.last_ingress = now;

        debug!(self.log, "channel opened"; "channel_id" => self.id);
    }

    pub fn close(&mut self) {
        debug!(self.log, "closing channel";
               "channel_id" => self.id,
               "read_size" => self.read_buffer.len(),
               "write_size" => self.write_buffer.len());

        self.read_buffer.clear();
        self.write_buffer.clear();
        self.id = None;
        self.state = ChannelState::Disconnected;

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn mark_connected(&mut self) {
        self.state = ChannelState::Connected;
    }

    #[inline]
    pub fn has_egress(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[inline]
    pub fn last_ingress(&self) -> Instant {
        self.last_ingress
    }

    pub fn register(&self, token: mio::Token, poll: &mio::Poll) -> Result<(), TransportError> {
        trace!(self.log, "registering channel on poll"; "channel_id" => self.id);

        poll.register(
            self.stream.as_ref().expect("channel must have a stream to register"),
            token,
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )
        .map_err(TransportError::from)
    }

    pub fn deregister(&self, poll: &mio::Poll) -> Result<(), TransportError> {
        trace!(self.log, "deregistering channel from poll"; "channel_id" => self.id);

        poll.deregister(self.stream.as_ref().expect("channel must have a stream to deregister"))
            .map_err(TransportError::from)
    }

    /// Reads everything currently available off the socket into the read
    /// buffer, returning the number of bytes read.
    pub fn receive(&mut self, now: Instant) -> Result<usize, TransportError> {
        let stream = self.stream.as_ref().expect("channel must have a stream to receive on");
        let received = self.read_buffer.ingress(stream).map_err(TransportError::from)?;

        if received > 0 {
            self.last_ingress = now;
        } else if received == 0 && self.state != ChannelState::Disconnected {
            // mio reports a readable-with-zero-bytes event on peer shutdown.
            return Err(TransportError::Closed);
        }

        Ok(received)
    }

    /// Flushes as much of the write buffer to the socket as will go without
    /// blocking.
    pub fn send(&mut self, now: Instant) -> Result<usize, TransportError> {
        if self.write_buffer.is_empty() {
            return Ok(0);
        }

        let stream = self.stream.as_ref().expect("channel must have a stream to send on");
        let sent = self.write_buffer.egress(stream).map_err(TransportError::from)?;

        if sent > 0 {
            self.last_egress = now;
        }

        Ok(sent)
    }

    /// Queues one frame for the next `send`.
    pub fn queue_frame(&mut self, type_id: u32, payload: &[u8]) {
        write_frame(&mut self.write_buffer, type_id, payload);
    }

    /// Pulls every complete frame currently buffered, in arrival order.
    pub fn drain_frames(&mut self) -> Vec<(u32, Vec<u8>)> {
        let mut frames = Vec::new();
        while let Some(frame) = try_take_frame(&mut self.read_buffer) {
            frames.push(frame);
        }
        frames
    }
}
