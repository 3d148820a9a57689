//! Server event queue: multi-producer/single-consumer, producer side
//! guarded by a shared-memory mutex, consumer side wait-free (§4.8).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::common::{Result, Status};

use super::sync::ShmMutex;

pub const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerEventType {
    Created = 0,
    StateChanged = 1,
    Destroyed = 2,
}

impl ServerEventType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerEventType::Created,
            1 => ServerEventType::StateChanged,
            _ => ServerEventType::Destroyed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ServerEvent {
    pub client_id: u32,
    event_type_tag: u8,
    _pad: [u8; 3],
}

impl ServerEvent {
    fn new(client_id: u32, event_type: ServerEventType) -> Self {
        ServerEvent {
            client_id,
            event_type_tag: event_type as u8,
            _pad: [0; 3],
        }
    }

    pub fn event_type(&self) -> ServerEventType {
        ServerEventType::from_u8(self.event_type_tag)
    }
}

#[repr(C)]
pub struct ServerEventQueue {
    mutex: ShmMutex,
    head: AtomicU32,
    tail: AtomicU32,
    slots: [ServerEvent; EVENT_QUEUE_CAPACITY],
}

impl ServerEventQueue {
    pub const fn byte_size() -> usize {
        std::mem::size_of::<ServerEventQueue>()
    }

    /// # Safety
    /// `at` must point to writable, correctly aligned memory, not
    /// concurrently accessed during this call.
    pub unsafe fn init(at: *mut ServerEventQueue) -> Result<()> {
        ShmMutex::init(std::ptr::addr_of_mut!((*at).mutex))?;
        (*at).head.store(0, Ordering::Relaxed);
        (*at).tail.store(0, Ordering::Relaxed);
        let empty = ServerEvent::new(0, ServerEventType::Created);
        for slot in (*at).slots.iter_mut() {
            std::ptr::write(slot, empty);
        }
        Ok(())
    }

    /// Pushes one event. Guarded by the region mutex so multiple client
    /// processes can push concurrently. Fails with `OperationFailure` if
    /// the queue is full (the consumer is expected to keep up).
    pub fn push(&self, client_id: u32, event_type: ServerEventType) -> Result<()> {
        let _guard = self.mutex.lock()?;
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % EVENT_QUEUE_CAPACITY as u32;
        if next == self.head.load(Ordering::Acquire) {
            return Err(Status::operation_failure("server event queue full"));
        }
        let slot_ptr = &self.slots[tail as usize] as *const ServerEvent as *mut ServerEvent;
        unsafe {
            std::ptr::write(slot_ptr, ServerEvent::new(client_id, event_type));
        }
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Pops one event without taking the mutex: the sole consumer only
    /// ever advances `head`, so this is wait-free.
    pub fn pop(&self) -> Option<ServerEvent> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let event = self.slots[head as usize];
        self.head
            .store((head + 1) % EVENT_QUEUE_CAPACITY as u32, Ordering::Release);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed_queue() -> Box<ServerEventQueue> {
        let layout = std::alloc::Layout::new::<ServerEventQueue>();
        unsafe {
            let ptr = std::alloc::alloc(layout) as *mut ServerEventQueue;
            ServerEventQueue::init(ptr).unwrap();
            Box::from_raw(ptr)
        }
    }

    #[test]
    fn pop_from_empty_queue_is_none() {
        let queue = boxed_queue();
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_then_pop_round_trips_in_order() {
        let queue = boxed_queue();
        queue.push(1, ServerEventType::Created).unwrap();
        queue.push(2, ServerEventType::StateChanged).unwrap();

        let first = queue.pop().unwrap();
        assert_eq!(first.client_id, 1);
        assert_eq!(first.event_type(), ServerEventType::Created);

        let second = queue.pop().unwrap();
        assert_eq!(second.client_id, 2);
        assert_eq!(second.event_type(), ServerEventType::StateChanged);

        assert!(queue.pop().is_none());
    }

    #[test]
    fn full_queue_rejects_further_pushes() {
        let queue = boxed_queue();
        for i in 0..(EVENT_QUEUE_CAPACITY as u32 - 1) {
            queue.push(i, ServerEventType::StateChanged).unwrap();
        }
        assert!(queue.push(999, ServerEventType::StateChanged).is_err());
    }
}
