//! Serializable binary payloads.
//!
//! Objects carrying large binary data (images, meshes) expose it through the
//! [`BufferObject`] capability. A buffer object is written by the network
//! thread and read by the render thread at the same time, so the payload is
//! guarded by two spin locks: one for the read path and one for the write path.
//! [`DoubleBuffer`] packages the usual arrangement: the writer fills a back
//! buffer and publishes it with a short swap, readers only see the front.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::task::{Clock, SystemClock};

/// An immutable, reference-counted binary blob.
///
/// Cloning shares the memory; use [`duplicate`](Self::duplicate) for a deep copy.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SerializedObject {
    data: Bytes,
}

impl SerializedObject {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Deep copy into freshly allocated memory.
    pub fn duplicate(&self) -> Self {
        Self {
            data: Bytes::copy_from_slice(&self.data),
        }
    }

    /// Whether both blobs point at the same memory.
    pub fn shares_memory_with(&self, other: &Self) -> bool {
        self.data.as_ptr() == other.data.as_ptr() && self.data.len() == other.data.len()
    }
}

impl From<Vec<u8>> for SerializedObject {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for SerializedObject {
    fn from(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }
}

impl fmt::Debug for SerializedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedObject")
            .field("len", &self.data.len())
            .finish()
    }
}

/// A busy-waiting lock for short critical sections.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for [`SpinLock`].
pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Front/back pair for payloads that are read and written concurrently.
pub struct DoubleBuffer<T> {
    front: SpinLock<T>,
    back: SpinLock<T>,
}

impl<T> DoubleBuffer<T> {
    pub fn new(front: T, back: T) -> Self {
        Self {
            front: SpinLock::new(front),
            back: SpinLock::new(back),
        }
    }

    /// Read the published value.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.front.lock())
    }

    /// Fill the back buffer. Readers are not blocked.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.back.lock())
    }

    /// Swap back and front. Holds the read lock only for the swap.
    pub fn publish(&self) {
        let mut back = self.back.lock();
        let mut front = self.front.lock();
        std::mem::swap(&mut *front, &mut *back);
    }
}

impl<T: Default> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new(T::default(), T::default())
    }
}

/// Bookkeeping shared by every buffer object.
pub struct BufferState {
    clock: Arc<dyn Clock>,
    timestamp: AtomicI64,
    updated_buffer: AtomicBool,
    staged: Mutex<Option<SerializedObject>>,
    staged_waiting: AtomicBool,
    read_lock: SpinLock<()>,
    write_lock: SpinLock<()>,
}

impl BufferState {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timestamp: AtomicI64::new(0),
            updated_buffer: AtomicBool::new(false),
            staged: Mutex::new(None),
            staged_waiting: AtomicBool::new(false),
            read_lock: SpinLock::new(()),
            write_lock: SpinLock::new(()),
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Acquire)
    }

    /// Record new data at `timestamp`, or now when `None`.
    ///
    /// The timestamp never moves backwards.
    pub fn update_timestamp(&self, timestamp: Option<i64>) {
        let ts = timestamp.unwrap_or_else(|| self.clock.now_us());
        self.timestamp.fetch_max(ts, Ordering::AcqRel);
        self.updated_buffer.store(true, Ordering::Release);
    }

    pub fn is_updated(&self) -> bool {
        self.updated_buffer.load(Ordering::Acquire)
    }

    pub fn clear_updated(&self) {
        self.updated_buffer.store(false, Ordering::Release);
    }

    /// Stage a blob for deserialization.
    ///
    /// Fails for an empty blob or when a blob is already waiting.
    pub fn stage(&self, object: SerializedObject) -> bool {
        if object.is_empty() {
            return false;
        }
        if self.staged_waiting.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.staged.lock() = Some(object);
        true
    }

    /// Take the staged blob, if any.
    pub fn take_staged(&self) -> Option<SerializedObject> {
        let object = self.staged.lock().take();
        if object.is_some() {
            self.staged_waiting.store(false, Ordering::Release);
        }
        object
    }

    pub fn has_staged(&self) -> bool {
        self.staged_waiting.load(Ordering::Acquire)
    }

    /// Lock taken by consumers while reading the payload.
    pub fn lock_read(&self) -> SpinGuard<'_, ()> {
        self.read_lock.lock()
    }

    /// Lock taken by producers while writing the payload.
    pub fn lock_write(&self) -> SpinGuard<'_, ()> {
        self.write_lock.lock()
    }
}

impl Default for BufferState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferState")
            .field("timestamp", &self.timestamp())
            .field("updated", &self.is_updated())
            .field("staged", &self.has_staged())
            .finish()
    }
}

/// Capability of objects carrying a serializable binary payload.
pub trait BufferObject: Send + Sync {
    /// Produce a self-describing blob of the current payload.
    fn serialize(&self) -> SerializedObject;

    /// Replace the payload from a blob produced by [`serialize`](Self::serialize)
    /// on a same-typed object.
    fn deserialize(&self, object: &SerializedObject) -> bool;

    fn state(&self) -> &BufferState;

    /// Stage a blob to be applied by [`deserialize_staged`](Self::deserialize_staged).
    fn set_serialized_object(&self, object: SerializedObject) -> bool {
        self.state().stage(object)
    }

    /// Apply the staged blob. Returns `false` when nothing was staged or the
    /// payload was rejected.
    fn deserialize_staged(&self) -> bool {
        let Some(object) = self.state().take_staged() else {
            return false;
        };
        let applied = self.deserialize(&object);
        if applied {
            self.update_timestamp(None);
        }
        applied
    }

    fn update_timestamp(&self, timestamp: Option<i64>) {
        self.state().update_timestamp(timestamp);
    }

    fn timestamp(&self) -> i64 {
        self.state().timestamp()
    }

    fn was_updated(&self) -> bool {
        self.state().is_updated()
    }

    fn set_not_updated(&self) {
        self.state().clear_updated();
    }
}

/// Buffer object holding opaque bytes.
#[derive(Default)]
pub struct BlobObject {
    state: BufferState,
    data: DoubleBuffer<Bytes>,
}

impl BlobObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: BufferState::with_clock(clock),
            data: DoubleBuffer::default(),
        }
    }

    /// Current payload.
    pub fn data(&self) -> Bytes {
        self.data.read(Bytes::clone)
    }

    /// Replace the payload locally.
    pub fn set_data(&self, data: impl Into<Bytes>) {
        let data = data.into();
        self.data.write(|back| *back = data);
        self.data.publish();
        self.update_timestamp(None);
    }
}

impl BufferObject for BlobObject {
    fn serialize(&self) -> SerializedObject {
        let _read = self.state.lock_read();
        SerializedObject::new(self.data())
    }

    fn deserialize(&self, object: &SerializedObject) -> bool {
        let _write = self.state.lock_write();
        self.data.write(|back| *back = object.bytes().clone());
        self.data.publish();
        true
    }

    fn state(&self) -> &BufferState {
        &self.state
    }
}

impl fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobObject")
            .field("len", &self.data().len())
            .field("state", &self.state)
            .finish()
    }
}
