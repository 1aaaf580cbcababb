//! The link between roots.
//!
//! A [`Link`] connects its local root to peers in two ways. Inner peers live
//! in the same process and receive calls directly. Outer peers are reached
//! through Unix sockets, with one channel for attribute messages and one for
//! buffers. A peer may be connected both ways at once, in which case it
//! receives everything twice.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use splash_core::logging::targets;
use splash_core::{ALL_PEERS, BufferObject, LinkPeer, RootObject, SerializedObject, Transport, Value};

use crate::address::{self, Channel};
use crate::codec;
use crate::config::LinkConfig;
use crate::error::LinkResult;
use crate::in_flight::InFlightBuffers;
use crate::socket::{self, OutboundPeer, Overflow, ReceiveLoop};

/// Message and buffer transport of one root.
pub struct Link {
    name: String,
    config: LinkConfig,
    running: Arc<AtomicBool>,
    inner_peers: RwLock<BTreeMap<String, Weak<dyn LinkPeer>>>,
    outer_peers: Mutex<BTreeMap<String, OutboundPeer>>,
    in_flight: Arc<InFlightBuffers>,
    receivers: Mutex<Vec<JoinHandle<()>>>,
    socket_paths: Vec<PathBuf>,
}

impl Link {
    /// Bind the inbound endpoints of `local` and start both receive loops.
    ///
    /// Received messages are applied asynchronously to the local root;
    /// received buffers are deserialized on the receive thread.
    pub fn new<P>(local: &Arc<P>, config: LinkConfig) -> LinkResult<Self>
    where
        P: LinkPeer + 'static,
    {
        let name = local.peer_name();
        let weak: Weak<P> = Arc::downgrade(local);
        let local: Weak<dyn LinkPeer> = weak;

        let message_path = address::socket_path(&config, Channel::Message, &name);
        let buffer_path = address::socket_path(&config, Channel::Buffer, &name);
        let message_listener = socket::bind(&message_path)?;
        let buffer_listener = socket::bind(&buffer_path)?;

        let link = Self {
            name,
            running: Arc::new(AtomicBool::new(true)),
            inner_peers: RwLock::new(BTreeMap::new()),
            outer_peers: Mutex::new(BTreeMap::new()),
            in_flight: InFlightBuffers::new(),
            receivers: Mutex::new(Vec::with_capacity(2)),
            socket_paths: vec![message_path, buffer_path],
            config,
        };

        let messages = {
            let local = local.clone();
            ReceiveLoop::new(
                Channel::Message,
                message_listener,
                link.config.message_hwm,
                Overflow::Backpressure,
                link.config.poll_interval_duration(),
                move |frames: codec::Frames| match codec::decode_message(&frames) {
                    Ok((target, attribute, values)) => {
                        if let Some(root) = local.upgrade() {
                            root.set(&target, &attribute, &values, true);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: targets::LINK, "Discarding malformed message: {e}");
                    }
                },
            )
        };
        let buffers = ReceiveLoop::new(
            Channel::Buffer,
            buffer_listener,
            link.config.buffer_hwm,
            Overflow::DropOldest,
            link.config.poll_interval_duration(),
            move |frames: codec::Frames| match codec::decode_buffer(&frames) {
                Ok((target, object)) => {
                    if let Some(root) = local.upgrade() {
                        root.set_from_serialized_object(&target, object);
                    }
                }
                Err(e) => {
                    tracing::warn!(target: targets::LINK, "Discarding malformed buffer: {e}");
                }
            },
        );

        // On failure the partially started link is dropped, which joins the
        // loops already running.
        let handle = messages.spawn(&link.name, link.running.clone())?;
        link.receivers.lock().push(handle);
        let handle = buffers.spawn(&link.name, link.running.clone())?;
        link.receivers.lock().push(handle);

        tracing::debug!(
            target: targets::LINK,
            name = %link.name,
            uri = %address::socket_uri(&link.config, Channel::Message, &link.name),
            "Link started"
        );
        Ok(link)
    }

    /// Create a link for `root` and install it as the root's transport.
    pub fn attach(root: &Arc<RootObject>, config: LinkConfig) -> LinkResult<Arc<Self>> {
        let link = Arc::new(Self::new(root, config)?);
        root.attach_transport(link.clone());
        Ok(link)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Inbound endpoint of this link on `channel`, as a URI.
    pub fn uri(&self, channel: Channel) -> String {
        address::socket_uri(&self.config, channel, &self.name)
    }

    /// Connect to an outer peer through its sockets.
    ///
    /// Connecting twice is a no-op. The peer does not have to be listening
    /// yet: sends retry the connection. Blocks for the configured connect
    /// delay, which does not guarantee that the first send is delivered.
    pub fn connect_to(&self, name: &str) -> bool {
        {
            let mut outer = self.outer_peers.lock();
            if outer.contains_key(name) {
                return true;
            }

            let peer = OutboundPeer::connect(
                name,
                address::socket_path(&self.config, Channel::Message, name),
                address::socket_path(&self.config, Channel::Buffer, name),
                self.config.buffer_hwm,
                self.config.send_timeout_duration(),
            );
            match peer {
                Ok(peer) => {
                    outer.insert(name.to_string(), peer);
                }
                Err(e) => {
                    tracing::warn!(target: targets::LINK, "Could not connect to {name}: {e}");
                    return false;
                }
            }
        }

        tracing::debug!(target: targets::LINK, "{} connected to {name}", self.name);
        thread::sleep(self.config.connect_delay_duration());
        true
    }

    /// Connect to a root of the same process, called directly on sends.
    pub fn connect_to_peer<P>(&self, name: &str, peer: &Arc<P>) -> bool
    where
        P: LinkPeer + 'static,
    {
        let weak: Weak<P> = Arc::downgrade(peer);
        let weak: Weak<dyn LinkPeer> = weak;
        self.inner_peers.write().insert(name.to_string(), weak);

        tracing::debug!(target: targets::LINK, "{} connected to {name} in process", self.name);
        thread::sleep(self.config.connect_delay_duration());
        true
    }

    /// Drop both the outer and the inner connection to `name`, if any.
    pub fn disconnect_from(&self, name: &str) {
        let outer = self.outer_peers.lock().remove(name);
        let inner = self.inner_peers.write().remove(name);
        if outer.is_none() && inner.is_none() {
            return;
        }
        if let Some(peer) = outer {
            peer.shutdown();
        }

        tracing::debug!(target: targets::LINK, "{} disconnected from {name}", self.name);
        thread::sleep(self.config.connect_delay_duration());
    }

    pub fn is_connected_to(&self, name: &str) -> bool {
        self.inner_peers.read().contains_key(name) || self.outer_peers.lock().contains_key(name)
    }

    /// Names of all connected peers, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner_peers.read().keys().cloned().collect();
        names.extend(self.outer_peers.lock().keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    fn inner_snapshot(&self) -> Vec<Arc<dyn LinkPeer>> {
        self.inner_peers
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Send an attribute update to `target` on every peer.
    ///
    /// Inner peers are updated before this returns. Outer sends are queued
    /// without bound and never dropped before reaching the socket. Returns
    /// false if the link is stopping or an outbound writer is gone.
    pub fn send_message(&self, target: &str, attribute: &str, values: &[Value]) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        if target != ALL_PEERS {
            tracing::debug!(target: targets::LINK, "{} sending {target}.{attribute}", self.name);
        }

        for peer in self.inner_snapshot() {
            peer.set(target, attribute, values, false);
        }

        let outer = self.outer_peers.lock();
        if outer.is_empty() {
            return true;
        }
        let frames = codec::encode_message(target, attribute, values);
        outer
            .values()
            .fold(true, |sent, peer| peer.queue_message(frames.clone()) && sent)
    }

    /// Send a serialized buffer to `target` on every peer.
    ///
    /// Each inner peer gets its own copy when more than one peer consumes the
    /// buffer. Outer sends share the memory, which stays in flight until the
    /// writer has sent it. An outer peer whose buffer queue is full misses
    /// the buffer and the call returns false.
    pub fn send_buffer(&self, target: &str, buffer: SerializedObject) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        if target != ALL_PEERS {
            tracing::debug!(target: targets::LINK, "{} sending buffer {target} ({} bytes)", self.name, buffer.len());
        }

        let inner = self.inner_snapshot();
        let outer_count = self.outer_peers.lock().len();
        let share = outer_count > 0 || inner.len() > 1;
        for peer in &inner {
            let object = if share { buffer.duplicate() } else { buffer.clone() };
            peer.set_from_serialized_object(target, object);
        }

        if outer_count == 0 {
            return true;
        }
        let header = codec::encode_buffer_header(target);
        let outer = self.outer_peers.lock();
        outer.values().fold(true, |sent, peer| {
            let ticket = self.in_flight.register(&buffer);
            peer.queue_buffer(header.clone(), buffer.clone(), ticket) && sent
        })
    }

    /// Serialize `object` and send it to `target`.
    pub fn send_buffer_object(&self, target: &str, object: &dyn BufferObject) -> bool {
        self.send_buffer(target, object.serialize())
    }

    /// Number of buffers queued or being written to outer peers.
    pub fn buffers_in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Wait until no buffer is in flight. Returns false on timeout.
    pub fn wait_for_buffer_sending(&self, timeout: Duration) -> bool {
        self.in_flight
            .wait_until_empty(timeout, self.config.poll_interval_duration())
    }
}

impl Transport for Link {
    fn send_message(&self, target: &str, attribute: &str, values: &[Value]) -> bool {
        Link::send_message(self, target, attribute, values)
    }

    fn send_buffer(&self, target: &str, buffer: SerializedObject) -> bool {
        Link::send_buffer(self, target, buffer)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);

        let outer = std::mem::take(&mut *self.outer_peers.lock());
        for peer in outer.into_values() {
            peer.shutdown();
        }

        let current = thread::current().id();
        for handle in self.receivers.lock().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        for path in &self.socket_paths {
            let _ = fs::remove_file(path);
        }
        tracing::debug!(target: targets::LINK, "Link {} stopped", self.name);
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("peers", &self.connected_peers())
            .field("in_flight", &self.buffers_in_flight())
            .finish()
    }
}
