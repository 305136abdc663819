//! Lock-free, single producer & single consumer (SPSC) ring buffer with natively variable
//! message sizes, plus a typed adapter ([`SpscMessageQueue`]) that moves values of any type
//! through the same byte arena.
//!
//! Both sides follow an acquire / commit protocol. Nothing is visible to the consumer until
//! the producer commits, and no space is reclaimed until the consumer commits.
//!
//! ## Examples
//! Use `acquire_write` to publish a message and `acquire_read` to receive it.
//! ```
//! use spscq::SpscQueue;
//!
//! let mut queue = SpscQueue::new(1024);
//!
//! // publish first message
//! let mut slot = queue.acquire_write(5).unwrap();
//! slot.get_buffer_mut().copy_from_slice(b"hello");
//! slot.commit();
//!
//! // publish second message
//! let mut slot = queue.acquire_write(5).unwrap();
//! slot.get_buffer_mut().copy_from_slice(b"world");
//! slot.commit();
//!
//! // read first message
//! let slot = queue.acquire_read().unwrap();
//! assert_eq!(b"hello", slot.get_buffer());
//! slot.commit();
//!
//! // read second message
//! let slot = queue.acquire_read().unwrap();
//! assert_eq!(b"world", slot.get_buffer());
//! slot.commit();
//!
//! // no more messages
//! assert!(queue.empty());
//! ```
//! Use `split` to hand each side to its own thread.
//! ```
//! use spscq::SpscQueue;
//! use spscq::error::Error;
//!
//! let (mut writer, mut reader) = SpscQueue::new(1024).split();
//!
//! let producer = std::thread::spawn(move || {
//!     for i in 0u64..100 {
//!         loop {
//!             match writer.acquire_write(8) {
//!                 Ok(mut slot) => {
//!                     slot.get_buffer_mut().copy_from_slice(&i.to_le_bytes());
//!                     slot.commit();
//!                     break;
//!                 }
//!                 Err(Error::Full) => std::hint::spin_loop(),
//!                 Err(err) => panic!("{err}"),
//!             }
//!         }
//!     }
//! });
//!
//! let mut expected = 0u64;
//! while expected < 100 {
//!     if let Ok(slot) = reader.acquire_read() {
//!         assert_eq!(expected, u64::from_le_bytes(slot.get_buffer().try_into().unwrap()));
//!         slot.commit();
//!         expected += 1;
//!     }
//! }
//! producer.join().unwrap();
//! ```

pub mod error;
pub mod mem;
pub mod message;
pub mod shutdown;

use crossbeam_utils::CachePadded;
use std::cmp::min;
use std::mem::{align_of, size_of};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, invalid_size};
use crate::mem::Arena;
// re-export
pub use error::Result;
pub use message::{MessageReader, MessageWriter, SpscMessageQueue};

/// Frame header size in bytes, every record is prefixed by one.
pub const FRAME_HEADER_SIZE: usize = size_of::<FrameHeader>();
/// Alignment of every frame (and therefore of every payload) within the arena.
pub const FRAME_ALIGNMENT: usize = align_of::<FrameHeader>();
const FRAME_HEADER_LEN_MASK: u32 = 0x7FFF_FFFF;
// represents the max value we can encode on the frame header for the payload length
const MAX_PAYLOAD_LEN: usize = FRAME_HEADER_LEN_MASK as usize;

/// Message frame header that contains packed `fields` (padding, length). The second word is
/// reserved and keeps the payload 8-byte aligned.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(8))]
struct FrameHeader {
    fields: u32,   // contains padding flag and payload length
    reserved: u32, // always 0
}

impl FrameHeader {
    #[inline]
    const fn new(payload_len: u32) -> Self {
        FrameHeader {
            fields: pack_fields(false, payload_len),
            reserved: 0,
        }
    }

    /// Padding frame covering `payload_len` bytes after its own header.
    #[inline]
    const fn new_padding(payload_len: u32) -> Self {
        FrameHeader {
            fields: pack_fields(true, payload_len),
            reserved: 0,
        }
    }

    #[inline]
    #[cfg(test)]
    const fn is_padding(&self) -> bool {
        self.unpack_fields().0
    }

    #[inline]
    #[cfg(test)]
    const fn payload_len(&self) -> u32 {
        self.unpack_fields().1
    }

    /// Extract `(padding, length)` fields from the frame header.
    #[inline]
    const fn unpack_fields(&self) -> (bool, u32) {
        unpack_fields(self.fields)
    }
}

/// Packs the `FrameHeader` fields into a single u32 according to the following encoding:
/// - Bit 31: padding flag
/// - Bits 0-30: payload length
const fn pack_fields(padding: bool, length: u32) -> u32 {
    (length & FRAME_HEADER_LEN_MASK) | ((padding as u32) << 31)
}

/// Unpacks `u32` field into a tuple: (padding, length).
const fn unpack_fields(fields: u32) -> (bool, u32) {
    let padding = (fields >> 31) & 1 == 1;
    let length = fields & FRAME_HEADER_LEN_MASK;
    (padding, length)
}

/// Calculate the number of bytes needed to ensure frame header alignment of the payload.
#[inline]
const fn get_aligned_size(payload_length: usize) -> usize {
    const ALIGNMENT_MASK: usize = FRAME_ALIGNMENT - 1;
    (payload_length + ALIGNMENT_MASK) & !ALIGNMENT_MASK
}

/// Number of arena bytes occupied by a record carrying `payload_len` bytes (frame header
/// included). Useful for sizing a queue as `frame_len(expected payload) * depth`.
#[inline]
pub const fn frame_len(payload_len: usize) -> usize {
    FRAME_HEADER_SIZE + get_aligned_size(payload_len)
}

/// Destroys a value living in a record payload. Registered by the typed adapter so that
/// values still in flight are released together with the arena.
pub(crate) type DropPayload = unsafe fn(*mut u8);

/// State shared by the producer and the consumer. The two positions are expressed in bytes
/// and will always increase, the arena index is `position % capacity`.
#[derive(Debug)]
pub(crate) struct Ring {
    write_position: CachePadded<AtomicUsize>, // published by the producer
    read_position: CachePadded<AtomicUsize>,  // published by the consumer
    arena: Arena,
    capacity: usize,
    drop_payload: Option<DropPayload>,
}

// The arena is only ever accessed through raw pointers, the producer touches bytes it has
// reserved and the consumer touches bytes between the two positions.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create ring backed by arena of at least `capacity` bytes (rounded up to frame alignment).
    ///
    /// ## Panics
    /// When `capacity` is zero.
    pub(crate) fn new(capacity: usize, drop_payload: Option<DropPayload>) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        let capacity = get_aligned_size(capacity);
        Self {
            write_position: CachePadded::new(AtomicUsize::new(0)),
            read_position: CachePadded::new(AtomicUsize::new(0)),
            arena: Arena::new(capacity),
            capacity,
            drop_payload,
        }
    }

    /// Get maximum payload length that can ever be accepted.
    #[inline]
    fn max_payload_len(&self) -> usize {
        min(self.capacity - FRAME_HEADER_SIZE, MAX_PAYLOAD_LEN)
    }

    /// Buffer index for the given position.
    #[inline]
    const fn index(&self, position: usize) -> usize {
        position % self.capacity
    }

    /// Get pointer to the frame header at the given position.
    #[inline]
    const fn frame_ptr(&self, position: usize) -> *mut FrameHeader {
        unsafe { self.arena.as_ptr().add(self.index(position)) as *mut FrameHeader }
    }

    /// Get pointer to the payload of the frame at the given position.
    #[inline]
    const fn payload_ptr(&self, position: usize) -> *mut u8 {
        unsafe { self.frame_ptr(position).add(1) as *mut u8 }
    }

    #[inline]
    fn read_frame_header(&self, position: usize) -> FrameHeader {
        unsafe { ptr::read(self.frame_ptr(position)) }
    }

    #[inline]
    fn write_frame_header(&self, position: usize, header: FrameHeader) {
        unsafe { ptr::write(self.frame_ptr(position), header) }
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        let Some(drop_payload) = self.drop_payload else {
            return;
        };
        // both sides are gone, walk whatever is still in flight
        let mut position = *self.read_position.get_mut();
        let limit = *self.write_position.get_mut();
        while position != limit {
            let (is_padding, length) = self.read_frame_header(position).unpack_fields();
            if !is_padding {
                unsafe { drop_payload(self.payload_ptr(position)) };
            }
            position += frame_len(length as usize);
        }
    }
}

/// Single producer, single consumer (SPSC) queue that owns its arena. Use it directly when
/// both sides live on the same thread or call `split()` to obtain `Writer` and `Reader`
/// that can be moved to their own threads.
#[derive(Debug)]
pub struct SpscQueue {
    writer: Writer,
    reader: Reader,
}

impl SpscQueue {
    /// Create new queue backed by arena of `capacity` bytes. The capacity is rounded up to
    /// a multiple of [`FRAME_ALIGNMENT`] and bounds the sum of all in-flight records,
    /// frame headers included.
    ///
    /// ## Panics
    /// When `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::from_ring(Ring::new(capacity, None))
    }

    pub(crate) fn from_ring(ring: Ring) -> Self {
        let ring = Arc::new(ring);
        Self {
            writer: Writer {
                ring: ring.clone(),
                position: 0,
                read_position: 0,
                tail_padding: 0,
            },
            reader: Reader {
                ring,
                position: 0,
                write_position: 0,
            },
        }
    }

    /// See [`Writer::acquire_write`].
    #[inline]
    pub fn acquire_write(&mut self, len: usize) -> Result<WriteSlot<'_>> {
        self.writer.acquire_write(len)
    }

    /// See [`Reader::acquire_read`].
    #[inline]
    pub fn acquire_read(&mut self) -> Result<ReadSlot<'_>> {
        self.reader.acquire_read()
    }

    /// Check if there is nothing left to read.
    #[inline]
    pub fn empty(&self) -> bool {
        self.reader.empty()
    }

    /// Arena size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.writer.capacity()
    }

    /// Get maximum payload length that can ever be accepted by the queue.
    #[inline]
    pub fn max_payload_len(&self) -> usize {
        self.writer.max_payload_len()
    }

    /// Will consume `self` and return the producer and consumer sides of the queue.
    pub fn split(self) -> (Writer, Reader) {
        (self.writer, self.reader)
    }
}

/// Producer side of the queue. Only single writer can exist for a given arena.
#[derive(Debug)]
pub struct Writer {
    ring: Arc<Ring>,
    position: usize,      // local producer position, published on commit
    read_position: usize, // cached consumer position
    tail_padding: usize,  // padding published on its own since the last record
}

impl Writer {
    /// Reserve space for `len` payload bytes following the current write position. If the
    /// record does not fit before the end of the arena, the tail is marked with a padding
    /// frame and the record is placed at the start of the arena. Nothing becomes visible to
    /// the consumer until [`WriteSlot::commit`] is called.
    ///
    /// Returns `Error::Full` if the record overlaps bytes the consumer has not committed yet,
    /// and `Error::InvalidSize` if `len` exceeds [`Writer::max_payload_len`].
    ///
    /// When the tail padding and the record can never be free at the same time (their sum
    /// exceeds the capacity) the padding frame is published on its own as soon as the tail
    /// is free, and the record is then placed from the start of the arena once the consumer
    /// has moved past it. No record is published either way.
    #[inline]
    pub fn acquire_write(&mut self, len: usize) -> Result<WriteSlot<'_>> {
        let max_payload_len = self.max_payload_len();
        if len > max_payload_len {
            return Err(invalid_size(len, max_payload_len));
        }

        let frame_len = frame_len(len);
        let remaining = self.remaining();
        let mut padding = if frame_len > remaining { remaining } else { 0 };

        if padding + frame_len > self.ring.capacity {
            if !self.has_space(padding) {
                return Err(Error::Full);
            }
            self.commit_padding(padding);
            padding = 0;
        }

        if !self.has_space(padding + frame_len) {
            return Err(Error::Full);
        }

        // the tail is free so the padding frame stays invisible until commit
        if padding > 0 {
            let header = FrameHeader::new_padding((padding - FRAME_HEADER_SIZE) as u32);
            self.ring.write_frame_header(self.position, header);
        }

        Ok(WriteSlot {
            position: self.position + padding,
            len,
            frame_len,
            padding,
            writer: self,
        })
    }

    /// Check if the consumer has read everything this writer has published.
    #[inline]
    pub fn empty(&self) -> bool {
        let read_position = self.ring.read_position.load(Ordering::Acquire);
        // padding published on its own carries no record
        read_position == self.position || read_position + self.tail_padding == self.position
    }

    /// Arena size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Get maximum payload length that can ever be accepted. It is calculated as
    /// `min(capacity - FRAME_HEADER_SIZE, (1 << 31) - 1)`.
    #[inline]
    pub fn max_payload_len(&self) -> usize {
        self.ring.max_payload_len()
    }

    /// Buffer index at which next write will happen.
    #[inline]
    fn index(&self) -> usize {
        self.ring.index(self.position)
    }

    /// Number of bytes remaining in the buffer before it will wrap around.
    #[inline]
    fn remaining(&self) -> usize {
        self.ring.capacity - self.index()
    }

    /// Publish a padding frame covering the rest of the arena without any record behind it.
    #[inline]
    fn commit_padding(&mut self, padding: usize) {
        let header = FrameHeader::new_padding((padding - FRAME_HEADER_SIZE) as u32);
        self.ring.write_frame_header(self.position, header);
        self.position += padding;
        self.tail_padding = padding;
        self.ring.write_position.store(self.position, Ordering::Release);
    }

    /// Check that `required` bytes are free, refreshing the cached consumer position only
    /// when the cached value says otherwise.
    #[inline]
    fn has_space(&mut self, required: usize) -> bool {
        let capacity = self.ring.capacity;
        if capacity - self.position.wrapping_sub(self.read_position) >= required {
            return true;
        }
        self.read_position = self.ring.read_position.load(Ordering::Acquire);
        capacity - self.position.wrapping_sub(self.read_position) >= required
    }
}

/// Region of the arena reserved for a single record. Dropping the slot without calling
/// `commit` abandons the reservation.
#[derive(Debug)]
pub struct WriteSlot<'a> {
    writer: &'a mut Writer, // underlying writer
    position: usize,        // frame position (past any padding)
    len: usize,             // actual payload length
    frame_len: usize,       // frame header + aligned payload length
    padding: usize,         // tail padding inserted before this frame
}

impl WriteSlot<'_> {
    /// Payload length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the first payload byte, aligned to [`FRAME_ALIGNMENT`].
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.writer.ring.payload_ptr(self.position)
    }

    /// Mutable pointer to the first payload byte, aligned to [`FRAME_ALIGNMENT`].
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.writer.ring.payload_ptr(self.position)
    }

    /// Get payload as byte slice.
    #[inline]
    pub fn get_buffer(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Get payload as mutable byte slice.
    #[inline]
    pub fn get_buffer_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Abort the publication.
    #[inline]
    pub fn abort(self) {}

    /// Commit the record thus making it (and any padding in front of it) visible to the
    /// consumer.
    #[inline]
    pub fn commit(self) {
        // update frame header
        self.writer
            .ring
            .write_frame_header(self.position, FrameHeader::new(self.len as u32));

        // advance writer position
        self.writer.position += self.padding + self.frame_len;
        self.writer.tail_padding = 0;

        // signal updated producer position
        self.writer
            .ring
            .write_position
            .store(self.writer.position, Ordering::Release);
    }
}

/// Consumer side of the queue. Only single reader can exist for a given arena.
#[derive(Debug)]
pub struct Reader {
    ring: Arc<Ring>,
    position: usize,       // local consumer position, published on commit
    write_position: usize, // cached producer position
}

impl Reader {
    /// Obtain the next committed record, skipping any padding frame. The record stays in
    /// place until [`ReadSlot::commit`] is called. Returns `Error::Empty` when the producer
    /// has not committed anything new.
    #[inline]
    pub fn acquire_read(&mut self) -> Result<ReadSlot<'_>> {
        loop {
            if self.position == self.write_position {
                self.write_position = self.ring.write_position.load(Ordering::Acquire);
                // no new messages
                if self.position == self.write_position {
                    return Err(Error::Empty);
                }
            }

            let (is_padding, length) = self.ring.read_frame_header(self.position).unpack_fields();
            if is_padding {
                // nothing to hand out, release the tail straight away and wrap around
                self.position += frame_len(length as usize);
                self.ring.read_position.store(self.position, Ordering::Release);
                continue;
            }

            return Ok(ReadSlot {
                position: self.position,
                len: length as usize,
                reader: self,
            });
        }
    }

    /// Check if there is nothing left to read.
    #[inline]
    pub fn empty(&self) -> bool {
        let write_position = self.ring.write_position.load(Ordering::Acquire);
        if self.position == write_position {
            return true;
        }
        // padding published on its own carries no record
        let (is_padding, length) = self.ring.read_frame_header(self.position).unpack_fields();
        is_padding && self.position + frame_len(length as usize) == write_position
    }

    /// Arena size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }
}

/// Committed record at the head of the queue. Dropping the slot without calling `commit`
/// leaves the record in place so the next `acquire_read` returns it again.
#[derive(Debug)]
pub struct ReadSlot<'a> {
    reader: &'a mut Reader, // underlying reader
    position: usize,        // frame position
    len: usize,             // payload length
}

impl ReadSlot<'_> {
    /// Payload length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the first payload byte, aligned to [`FRAME_ALIGNMENT`].
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.reader.ring.payload_ptr(self.position)
    }

    /// Get payload as byte slice.
    #[inline]
    pub fn get_buffer(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Release the record so that the producer can reuse its space.
    #[inline]
    pub fn commit(self) {
        self.reader.position += frame_len(self.len);
        self.reader
            .ring
            .read_position
            .store(self.reader.position, Ordering::Release);
    }
}
