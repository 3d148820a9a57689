//! Server and per-client shared-memory region layouts (§4.8): a
//! parameters header followed by the atomics, ring buffers, and event
//! queue that make up the region.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use shared_memory::{Shmem, ShmemConf};

use crate::common::{Result, Status};

use super::event_queue::ServerEventQueue;
use super::ring_buffer::{RingBuffer, RingBufferHeader};
use super::sync::ChangesCell;

/// Size of each direction's byte stream within a client region.
pub const RING_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Initializing = 0,
    Running = 1,
    Stopped = 2,
}

impl ServerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServerState::Initializing,
            1 => ServerState::Running,
            _ => ServerState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Created = 0,
    Connected = 1,
    Disconnected = 2,
    Error = 3,
}

impl ClientState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ClientState::Created,
            1 => ClientState::Connected,
            2 => ClientState::Disconnected,
            _ => ClientState::Error,
        }
    }
}

#[repr(C)]
struct ServerRegionHeader {
    state: AtomicU8,
    events: ServerEventQueue,
}

/// The server's own region: its Running/Stopped state plus the event
/// queue clients announce themselves through.
pub struct ServerRegion {
    shmem: Shmem,
    header: *mut ServerRegionHeader,
    name: String,
}

unsafe impl Send for ServerRegion {}
unsafe impl Sync for ServerRegion {}

impl ServerRegion {
    pub fn create(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .size(std::mem::size_of::<ServerRegionHeader>())
            .os_id(name)
            .create()
            .map_err(|e| Status::operation_failure(format!("shm create {name}: {e}")))?;
        let header = shmem.as_ptr() as *mut ServerRegionHeader;
        unsafe {
            (*header).state = AtomicU8::new(ServerState::Initializing as u8);
            ServerEventQueue::init(std::ptr::addr_of_mut!((*header).events))?;
        }
        Ok(ServerRegion {
            shmem,
            header,
            name: name.to_string(),
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| Status::connection_failure(format!("shm open {name}: {e}")))?;
        let header = shmem.as_ptr() as *mut ServerRegionHeader;
        Ok(ServerRegion {
            shmem,
            header,
            name: name.to_string(),
        })
    }

    fn header(&self) -> &ServerRegionHeader {
        unsafe { &*self.header }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.header().state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ServerState) {
        self.header().state.store(state as u8, Ordering::Release);
    }

    pub fn events(&self) -> &ServerEventQueue {
        &self.header().events
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[repr(C)]
struct ClientRegionHeader {
    changes: ChangesCell,
    client_state: AtomicU8,
}

/// A per-client region: the client's Created/Connected/Disconnected/Error
/// state, the shared changes-count cell, and the two byte ring buffers
/// (client→server, server→client).
pub struct ClientRegion {
    shmem: Shmem,
    header: *mut ClientRegionHeader,
    client_to_server: RingBuffer,
    server_to_client: RingBuffer,
    name: String,
}

unsafe impl Send for ClientRegion {}
unsafe impl Sync for ClientRegion {}

impl ClientRegion {
    fn total_size() -> usize {
        std::mem::size_of::<ClientRegionHeader>()
            + 2 * (RingBufferHeader::byte_size() + RING_CAPACITY)
    }

    pub fn create(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .size(Self::total_size())
            .os_id(name)
            .create()
            .map_err(|e| Status::operation_failure(format!("shm create {name}: {e}")))?;
        let base = shmem.as_ptr();
        let header = base as *mut ClientRegionHeader;
        unsafe {
            ChangesCell::init(std::ptr::addr_of_mut!((*header).changes))?;
            (*header).client_state = AtomicU8::new(ClientState::Created as u8);
        }
        let rings_base = unsafe { base.add(std::mem::size_of::<ClientRegionHeader>()) };
        let client_to_server = unsafe { RingBuffer::init(rings_base, RING_CAPACITY) };
        let server_to_client = unsafe {
            RingBuffer::init(
                rings_base.add(RingBufferHeader::byte_size() + RING_CAPACITY),
                RING_CAPACITY,
            )
        };
        Ok(ClientRegion {
            shmem,
            header,
            client_to_server,
            server_to_client,
            name: name.to_string(),
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| Status::connection_failure(format!("shm open {name}: {e}")))?;
        let base = shmem.as_ptr();
        let header = base as *mut ClientRegionHeader;
        let rings_base = unsafe { base.add(std::mem::size_of::<ClientRegionHeader>()) };
        let client_to_server = unsafe { RingBuffer::attach(rings_base, RING_CAPACITY) };
        let server_to_client = unsafe {
            RingBuffer::attach(
                rings_base.add(RingBufferHeader::byte_size() + RING_CAPACITY),
                RING_CAPACITY,
            )
        };
        Ok(ClientRegion {
            shmem,
            header,
            client_to_server,
            server_to_client,
            name: name.to_string(),
        })
    }

    fn header(&self) -> &ClientRegionHeader {
        unsafe { &*self.header }
    }

    pub fn changes(&self) -> &ChangesCell {
        &self.header().changes
    }

    pub fn client_state(&self) -> ClientState {
        ClientState::from_u8(self.header().client_state.load(Ordering::Acquire))
    }

    pub fn set_client_state(&self, state: ClientState) {
        self.header()
            .client_state
            .store(state as u8, Ordering::Release);
        self.changes().bump();
    }

    /// Stream written by the client, read by the server.
    pub fn client_to_server(&self) -> &RingBuffer {
        &self.client_to_server
    }

    /// Stream written by the server, read by the client.
    pub fn server_to_client(&self) -> &RingBuffer {
        &self.server_to_client
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Default bound on a reader's condvar wait, per §5: sleeping reader
/// threads poll at this interval even absent events, so shutdown stays
/// bounded.
pub const CHANGES_POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_region_create_and_open_share_rings() {
        let name = format!("msgpack-rpc-test-region-{}", std::process::id());
        let created = ClientRegion::create(&name).unwrap();
        created.client_to_server().write_some(b"hi");

        let opened = ClientRegion::open(&name).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(opened.client_to_server().read_some(&mut buf), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn server_region_state_round_trips() {
        let name = format!("msgpack-rpc-test-server-region-{}", std::process::id());
        let region = ServerRegion::create(&name).unwrap();
        assert_eq!(region.state(), ServerState::Initializing);
        region.set_state(ServerState::Running);
        assert_eq!(region.state(), ServerState::Running);
    }
}
