//! Accounting of buffers handed to outbound writers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use splash_core::{SerializedObject, SpinLock};

/// Buffers queued for sending and not yet released by their writer.
///
/// The list keeps each payload alive until the writer is done with it. The
/// critical sections are a push or a linear scan, hence the spin lock.
#[derive(Default)]
pub struct InFlightBuffers {
    buffers: SpinLock<Vec<SerializedObject>>,
    count: AtomicUsize,
}

impl InFlightBuffers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a buffer. It stays in flight until the ticket is dropped.
    pub fn register(self: &Arc<Self>, buffer: &SerializedObject) -> InFlightTicket {
        let address = buffer.as_slice().as_ptr() as usize;
        self.buffers.lock().push(buffer.clone());
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightTicket {
            owner: Arc::clone(self),
            address,
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Poll until nothing is in flight. Returns false on timeout.
    pub fn wait_until_empty(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(poll);
        }
    }

    fn release(&self, address: usize) {
        let mut buffers = self.buffers.lock();
        if let Some(index) = buffers
            .iter()
            .position(|b| b.as_slice().as_ptr() as usize == address)
        {
            buffers.swap_remove(index);
        }
        drop(buffers);
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Release handle of one in-flight buffer.
pub struct InFlightTicket {
    owner: Arc<InFlightBuffers>,
    address: usize,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.owner.release(self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let in_flight = InFlightBuffers::new();
        let a = SerializedObject::from_vec(vec![1; 8]);
        let b = SerializedObject::from_vec(vec![2; 8]);

        let ticket_a = in_flight.register(&a);
        let ticket_b = in_flight.register(&b);
        let ticket_a2 = in_flight.register(&a);
        assert_eq!(in_flight.count(), 3);

        drop(ticket_b);
        assert_eq!(in_flight.count(), 2);
        assert!(in_flight.buffers.lock().iter().all(|x| x.shares_memory_with(&a)));

        drop(ticket_a);
        drop(ticket_a2);
        assert_eq!(in_flight.count(), 0);
        assert!(in_flight.buffers.lock().is_empty());
    }

    #[test]
    fn test_wait_until_empty() {
        let in_flight = InFlightBuffers::new();
        assert!(in_flight.wait_until_empty(Duration::ZERO, Duration::from_millis(1)));

        let ticket = in_flight.register(&SerializedObject::from_vec(vec![0; 4]));
        assert!(!in_flight.wait_until_empty(Duration::from_millis(5), Duration::from_millis(1)));

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            drop(ticket);
        });
        assert!(in_flight.wait_until_empty(Duration::from_secs(2), Duration::from_millis(1)));
        releaser.join().unwrap();
    }
}
