use msgpack_rpc_rs::shm::{RingBuffer, RingBufferHeader};

/// Backs a `RingBuffer` with a heap allocation; real usage places the same
/// layout inside a shared-memory mapping.
fn ring_buffer_for_test(capacity: usize) -> (Vec<u8>, RingBuffer) {
    let mut storage = vec![0u8; RingBufferHeader::byte_size() + capacity];
    let ring = unsafe { RingBuffer::init(storage.as_mut_ptr(), capacity) };
    (storage, ring)
}

#[test]
fn empty_buffer_reports_zero_available() {
    let (_storage, ring) = ring_buffer_for_test(7);
    let mut out = [0u8; 4];
    assert_eq!(ring.read_some(&mut out), 0);
}

#[test]
fn write_of_capacity_into_empty_buffer_reserves_one_slot() {
    let (_storage, ring) = ring_buffer_for_test(7);
    let written = ring.write_some(b"abcdefg");
    assert_eq!(written, 6);
}

#[test]
fn round_trips_bytes_in_order() {
    let (_storage, ring) = ring_buffer_for_test(16);
    assert_eq!(ring.write_some(b"hello"), 5);
    let mut out = [0u8; 5];
    assert_eq!(ring.read_some(&mut out), 5);
    assert_eq!(&out, b"hello");
}

#[test]
fn attach_sees_bytes_written_through_the_original_handle() {
    let (mut storage, ring) = ring_buffer_for_test(16);
    assert_eq!(ring.write_some(b"hi"), 2);
    let attached = unsafe { RingBuffer::attach(storage.as_mut_ptr(), 16) };
    let mut out = [0u8; 2];
    assert_eq!(attached.read_some(&mut out), 2);
    assert_eq!(&out, b"hi");
}

#[test]
fn write_wraps_around_when_cursors_are_offset_near_the_end() {
    // capacity 7, data region immediately follows the header; fill the
    // buffer until the write cursor sits a few bytes short of the end
    // with only two bytes free, then write enough to wrap around.
    let (storage, ring) = ring_buffer_for_test(7);
    assert_eq!(ring.write_some(b"abcde"), 5);
    let mut drained = [0u8; 4];
    assert_eq!(ring.read_some(&mut drained), 4);
    assert_eq!(&drained, b"abcd");

    // next_written=5, next_read=4: five bytes free, two of which wrap.
    let written = ring.write_some(b"abcdef");
    assert_eq!(written, 5);

    let data_start = RingBufferHeader::byte_size();
    let data = &storage[data_start..data_start + 7];
    assert_eq!(&data[5..7], b"ab");
    assert_eq!(&data[0..3], b"cde");
}
