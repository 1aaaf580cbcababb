//! Socket workers: one inbound receive loop per channel, one outbound writer
//! per channel of each connected peer.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use splash_core::SerializedObject;
use splash_core::logging::targets;

use crate::address::Channel;
use crate::codec::{self, FrameReader, Frames};
use crate::error::LinkError;
use crate::in_flight::InFlightTicket;

const READ_CHUNK: usize = 64 * 1024;

/// Shortest wait for outbound writers on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Bind an inbound endpoint, replacing a stale socket file.
pub(crate) fn bind(path: &Path) -> Result<UnixListener, LinkError> {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    let listener = UnixListener::bind(path).map_err(|source| LinkError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| LinkError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(listener)
}

struct Connection {
    stream: UnixStream,
    reader: FrameReader,
}

/// What a receive loop does when its queue reaches the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    /// Keep reading and drop the oldest queued entries.
    DropOldest,
    /// Stop reading until the queue drains, leaving data in the socket.
    Backpressure,
}

/// Inbound side of one channel.
///
/// Accepts connections, reassembles messages into a queue bounded by the
/// high-water mark and hands them to the handler in arrival order. What
/// happens past the mark depends on the [`Overflow`] policy.
pub(crate) struct ReceiveLoop<H> {
    channel: Channel,
    listener: UnixListener,
    connections: Vec<Connection>,
    queue: VecDeque<Frames>,
    hwm: usize,
    overflow: Overflow,
    poll_interval: Duration,
    handler: H,
}

impl<H> ReceiveLoop<H>
where
    H: FnMut(Frames) + Send + 'static,
{
    pub(crate) fn new(
        channel: Channel,
        listener: UnixListener,
        hwm: usize,
        overflow: Overflow,
        poll_interval: Duration,
        handler: H,
    ) -> Self {
        Self {
            channel,
            listener,
            connections: Vec::new(),
            queue: VecDeque::new(),
            hwm: hwm.max(1),
            overflow,
            poll_interval,
            handler,
        }
    }

    pub(crate) fn spawn(
        self,
        name: &str,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, LinkError> {
        let thread_name = format!("splash-link-{}{}", self.channel.discriminator(), name);
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || self.run(&running))
            .map_err(LinkError::Spawn)
    }

    fn run(mut self, running: &AtomicBool) {
        let mut scratch = vec![0u8; READ_CHUNK];
        while running.load(Ordering::Acquire) {
            let busy = self.accept() | self.read(&mut scratch);
            self.dispatch(running);
            if !busy {
                thread::sleep(self.poll_interval);
            }
        }
    }

    fn accept(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(target: targets::LINK, "Could not configure inbound stream: {e}");
                        continue;
                    }
                    self.connections.push(Connection {
                        stream,
                        reader: FrameReader::new(),
                    });
                    accepted = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return accepted,
                Err(e) => {
                    tracing::warn!(target: targets::LINK, "Accept failed on {:?} channel: {e}", self.channel);
                    return accepted;
                }
            }
        }
    }

    fn read(&mut self, scratch: &mut [u8]) -> bool {
        let mut busy = false;
        let channel = self.channel;
        let capacity = match self.overflow {
            Overflow::DropOldest => usize::MAX,
            Overflow::Backpressure => self.hwm,
        };
        let queue = &mut self.queue;
        self.connections.retain_mut(|connection| loop {
            while queue.len() < capacity {
                match connection.reader.next_message() {
                    Ok(Some(frames)) => queue.push_back(frames),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(target: targets::LINK, "Dropping desynchronized {channel:?} stream: {e}");
                        return false;
                    }
                }
            }
            if queue.len() >= capacity {
                // The rest waits in the socket until the queue is dispatched
                busy = true;
                return true;
            }
            match connection.stream.read(scratch) {
                Ok(0) => return false,
                Ok(n) => {
                    busy = true;
                    connection.reader.push(&scratch[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(target: targets::LINK, "Inbound stream closed: {e}");
                    return false;
                }
            }
        });
        busy
    }

    fn dispatch(&mut self, running: &AtomicBool) {
        if self.overflow == Overflow::DropOldest {
            let excess = self.queue.len().saturating_sub(self.hwm);
            if excess > 0 {
                self.queue.drain(..excess);
                tracing::debug!(target: targets::LINK, "Dropped {excess} stale entries from the {:?} queue", self.channel);
            }
        }
        while let Some(frames) = self.queue.pop_front() {
            if !running.load(Ordering::Acquire) {
                return;
            }
            (self.handler)(frames);
        }
    }
}

/// Work items of an outbound writer.
pub(crate) enum Outgoing {
    Message(Frames),
    Buffer {
        header: bytes::Bytes,
        payload: SerializedObject,
        ticket: InFlightTicket,
    },
}

/// Outbound side of one channel to one peer.
///
/// The stream is connected lazily and reconnected on the next send after a
/// failure. Whatever cannot be delivered is dropped.
pub(crate) struct PeerWriter {
    peer: String,
    channel: Channel,
    path: PathBuf,
    stream: Option<UnixStream>,
    send_timeout: Option<Duration>,
}

impl PeerWriter {
    pub(crate) fn new(
        peer: &str,
        channel: Channel,
        path: PathBuf,
        send_timeout: Option<Duration>,
    ) -> Self {
        Self {
            peer: peer.to_string(),
            channel,
            path,
            stream: None,
            send_timeout,
        }
    }

    /// Run the writer until every sender of `receiver` is gone.
    ///
    /// `done` is dropped when the thread exits.
    pub(crate) fn spawn(
        self,
        receiver: Receiver<Outgoing>,
        done: Sender<()>,
    ) -> Result<JoinHandle<()>, LinkError> {
        thread::Builder::new()
            .name(format!("splash-link-out-{}{}", self.channel.discriminator(), self.peer))
            .spawn(move || {
                let _done = done;
                self.run(receiver);
            })
            .map_err(LinkError::Spawn)
    }

    fn run(mut self, receiver: Receiver<Outgoing>) {
        // Early connection so the peer sees us before the first send
        self.stream();

        for outgoing in receiver {
            match outgoing {
                Outgoing::Message(frames) => {
                    let slices: Vec<&[u8]> = frames.iter().map(|f| f.as_ref()).collect();
                    self.write(&slices);
                }
                Outgoing::Buffer {
                    header,
                    payload,
                    ticket,
                } => {
                    self.write(&[header.as_ref(), payload.as_slice()]);
                    drop(ticket);
                }
            }
        }
    }

    fn write(&mut self, frames: &[&[u8]]) {
        let channel = self.channel;
        let Some(stream) = self.stream() else {
            tracing::debug!(target: targets::LINK, "Peer {} unreachable, dropping {channel:?} send", self.peer);
            return;
        };
        match codec::write_frames(stream, frames) {
            Ok(()) => {}
            // Refused before writing, the stream is still in sync
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                tracing::warn!(target: targets::LINK, "Dropping {channel:?} send to {}: {e}", self.peer);
            }
            Err(e) => {
                tracing::warn!(target: targets::LINK, "Error while sending to {}: {e}", self.peer);
                self.stream = None;
            }
        }
    }

    fn stream(&mut self) -> Option<&mut UnixStream> {
        if self.stream.is_none() {
            match UnixStream::connect(&self.path) {
                Ok(stream) => {
                    let _ = stream.set_write_timeout(self.send_timeout);
                    self.stream = Some(stream);
                }
                Err(e) => {
                    tracing::trace!(target: targets::LINK, "Connecting to {} failed: {e}", self.path.display());
                }
            }
        }
        self.stream.as_mut()
    }
}

/// Handle kept by the link for each connected outer peer.
///
/// Messages go through an unbounded queue and are never dropped here.
/// Buffers go through a queue bounded by the buffer high-water mark and are
/// dropped when it is full.
pub(crate) struct OutboundPeer {
    peer: String,
    messages: Sender<Outgoing>,
    buffers: Sender<Outgoing>,
    writers: Vec<JoinHandle<()>>,
    done: Receiver<()>,
    grace: Duration,
}

impl OutboundPeer {
    /// Start the message and buffer writers of `peer`.
    pub(crate) fn connect(
        peer: &str,
        message_path: PathBuf,
        buffer_path: PathBuf,
        buffer_hwm: usize,
        send_timeout: Option<Duration>,
    ) -> Result<Self, LinkError> {
        let (done_sender, done) = crossbeam_channel::bounded(0);
        let (messages, message_queue) = crossbeam_channel::unbounded();
        let (buffers, buffer_queue) = crossbeam_channel::bounded(buffer_hwm.max(1));

        let message_writer = PeerWriter::new(peer, Channel::Message, message_path, send_timeout)
            .spawn(message_queue, done_sender.clone())?;
        // On failure `messages` is dropped, which stops the message writer
        let buffer_writer = PeerWriter::new(peer, Channel::Buffer, buffer_path, send_timeout)
            .spawn(buffer_queue, done_sender)?;

        Ok(Self {
            peer: peer.to_string(),
            messages,
            buffers,
            writers: vec![message_writer, buffer_writer],
            done,
            grace: send_timeout.unwrap_or(SHUTDOWN_GRACE).max(SHUTDOWN_GRACE),
        })
    }

    /// Queue a message. Returns false only once the writer is gone.
    pub(crate) fn queue_message(&self, frames: Frames) -> bool {
        self.messages.send(Outgoing::Message(frames)).is_ok()
    }

    /// Queue a buffer. Returns false when the queue is full or closed, in
    /// which case the buffer is released right away.
    pub(crate) fn queue_buffer(
        &self,
        header: bytes::Bytes,
        payload: SerializedObject,
        ticket: InFlightTicket,
    ) -> bool {
        let outgoing = Outgoing::Buffer {
            header,
            payload,
            ticket,
        };
        match self.buffers.try_send(outgoing) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(target: targets::LINK, "Buffer queue to {} full, dropping buffer", self.peer);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Close both queues and wait a bounded time for the writers to drain
    /// them. Writers stuck on a peer that stopped reading are detached.
    pub(crate) fn shutdown(self) {
        let Self {
            peer,
            messages,
            buffers,
            writers,
            done,
            grace,
        } = self;
        drop(messages);
        drop(buffers);

        let current = thread::current().id();
        if writers.iter().any(|writer| writer.thread().id() == current) {
            return;
        }
        if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(grace) {
            tracing::warn!(target: targets::LINK, "Writers to {peer} still busy after {grace:?}, detaching them");
            return;
        }
        for writer in writers {
            let _ = writer.join();
        }
    }
}
