//! Typed adapter over the byte queue. Every value of `T` travels as a single record: it is
//! moved into the record payload on push and moved back out on pop, so each value is
//! constructed once and destroyed once regardless of the number of hops through the arena.
//!
//! ## Examples
//! ```
//! use spscq::SpscMessageQueue;
//! use spscq::error::Error;
//!
//! let mut queue = SpscMessageQueue::<String>::new(2);
//! queue.try_push("hello".to_owned()).unwrap();
//! queue.try_push("world".to_owned()).unwrap();
//!
//! // rejected value is handed back
//! let err = queue.try_push("!".to_owned()).unwrap_err();
//! assert_eq!(Error::Full, err.error);
//! assert_eq!("!", err.into_inner());
//!
//! assert_eq!("hello", queue.try_pop().unwrap());
//! assert_eq!("world", queue.try_pop().unwrap());
//! assert_eq!(Error::Empty, queue.try_pop().unwrap_err());
//! ```

use crate::error::{PushError, Result};
use crate::{FRAME_ALIGNMENT, Reader, Ring, SpscQueue, Writer, frame_len};
use std::marker::PhantomData;
use std::mem::{align_of, needs_drop, size_of};
use std::ptr;

/// Extra payload bytes needed to place `T` at its alignment within a frame aligned payload.
const fn align_slack<T>() -> usize {
    align_of::<T>().saturating_sub(FRAME_ALIGNMENT)
}

/// Payload length requested from the byte queue for a single `T`.
const fn payload_len<T>() -> usize {
    size_of::<T>() + align_slack::<T>()
}

/// Number of arena bytes occupied by a single `T` (frame header included).
pub const fn message_frame_len<T>() -> usize {
    frame_len(payload_len::<T>())
}

/// Address of the `T` stored in the payload starting at `payload`. Producer and consumer see
/// the same payload address, so both arrive at the same value address.
#[inline]
fn value_ptr<T>(payload: *mut u8) -> *mut T {
    let addr = payload as usize;
    payload.wrapping_add(addr.next_multiple_of(align_of::<T>()) - addr) as *mut T
}

unsafe fn drop_payload<T>(payload: *mut u8) {
    unsafe { ptr::drop_in_place(value_ptr::<T>(payload)) }
}

/// Single producer, single consumer queue of `T` values backed by a byte arena sized for
/// `capacity` values.
#[derive(Debug)]
pub struct SpscMessageQueue<T> {
    writer: MessageWriter<T>,
    reader: MessageReader<T>,
}

impl<T> SpscMessageQueue<T> {
    /// Create new queue that can hold up to `capacity` values at the same time.
    ///
    /// ## Panics
    /// When `capacity` is zero or the arena size overflows.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        let bytes = capacity
            .checked_mul(message_frame_len::<T>())
            .expect("capacity overflow");
        let drop_payload = needs_drop::<T>().then_some(drop_payload::<T> as unsafe fn(*mut u8));
        let (writer, reader) = SpscQueue::from_ring(Ring::new(bytes, drop_payload)).split();
        Self {
            writer: MessageWriter {
                writer,
                capacity,
                _marker: PhantomData,
            },
            reader: MessageReader {
                reader,
                _marker: PhantomData,
            },
        }
    }

    /// See [`MessageWriter::try_push`].
    #[inline]
    pub fn try_push(&mut self, value: T) -> std::result::Result<(), PushError<T>> {
        self.writer.try_push(value)
    }

    /// See [`MessageReader::try_pop`].
    #[inline]
    pub fn try_pop(&mut self) -> Result<T> {
        self.reader.try_pop()
    }

    /// See [`MessageReader::try_pop_into`].
    #[inline]
    pub fn try_pop_into(&mut self, out: &mut T) -> Result<()> {
        self.reader.try_pop_into(out)
    }

    /// Check if there is nothing left to pop.
    #[inline]
    pub fn empty(&self) -> bool {
        self.reader.empty()
    }

    /// Maximum number of values the queue can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.writer.capacity
    }

    /// Will consume `self` and return the producer and consumer sides of the queue.
    pub fn split(self) -> (MessageWriter<T>, MessageReader<T>) {
        (self.writer, self.reader)
    }
}

/// Producer side of [`SpscMessageQueue`].
#[derive(Debug)]
pub struct MessageWriter<T> {
    writer: Writer,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T> MessageWriter<T> {
    /// Move `value` into the next free record and publish it. On failure (`Error::Full`)
    /// the value is returned inside the error.
    #[inline]
    pub fn try_push(&mut self, value: T) -> std::result::Result<(), PushError<T>> {
        match self.writer.acquire_write(payload_len::<T>()) {
            Ok(mut slot) => {
                unsafe { value_ptr::<T>(slot.as_mut_ptr()).write(value) };
                slot.commit();
                Ok(())
            }
            Err(err) => Err(PushError::new(err, value)),
        }
    }

    /// Check if the consumer has popped everything this writer has pushed.
    #[inline]
    pub fn empty(&self) -> bool {
        self.writer.empty()
    }

    /// Maximum number of values the queue can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer side of [`SpscMessageQueue`].
#[derive(Debug)]
pub struct MessageReader<T> {
    reader: Reader,
    _marker: PhantomData<T>,
}

impl<T> MessageReader<T> {
    /// Move the oldest value out of the queue. The record is released only after the value
    /// has left it, so its bytes are never reused while the value still lives there.
    #[inline]
    pub fn try_pop(&mut self) -> Result<T> {
        let slot = self.reader.acquire_read()?;
        debug_assert_eq!(payload_len::<T>(), slot.len());
        let value = unsafe { ptr::read(value_ptr::<T>(slot.as_ptr().cast_mut())) };
        slot.commit();
        Ok(value)
    }

    /// Pop the oldest value into `out`, dropping the value `out` held before.
    #[inline]
    pub fn try_pop_into(&mut self, out: &mut T) -> Result<()> {
        *out = self.try_pop()?;
        Ok(())
    }

    /// Check if there is nothing left to pop.
    #[inline]
    pub fn empty(&self) -> bool {
        self.reader.empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    /// Counts constructions and destructions.
    #[derive(Debug, Default)]
    struct Counters {
        created: AtomicUsize,
        dropped: AtomicUsize,
    }

    #[derive(Debug)]
    struct Tracked {
        id: usize,
        counters: Arc<Counters>,
    }

    impl Tracked {
        fn new(id: usize, counters: &Arc<Counters>) -> Self {
            counters.created.fetch_add(1, SeqCst);
            Self {
                id,
                counters: counters.clone(),
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, SeqCst);
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        seq: u64,
        iq: Vec<(f32, f32)>,
        label: String,
    }

    #[repr(align(64))]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct CacheAligned([u8; 64]);

    #[test]
    fn should_size_frames_for_type() {
        assert_eq!(16, message_frame_len::<u64>());
        assert_eq!(16, message_frame_len::<u8>());
        assert_eq!(8, message_frame_len::<()>());
        assert_eq!(8 + 64 + 56, message_frame_len::<CacheAligned>());

        let queue = SpscMessageQueue::<u64>::new(4);
        assert_eq!(4, queue.capacity());
        assert!(queue.empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than zero")]
    fn should_reject_zero_capacity() {
        let _ = SpscMessageQueue::<u64>::new(0);
    }

    #[test]
    fn should_round_trip_values() {
        let mut queue = SpscMessageQueue::<Sample>::new(8);
        let sample = Sample {
            seq: 42,
            iq: vec![(0.5, -0.5), (1.0, 0.0)],
            label: "rx0".to_owned(),
        };

        queue.try_push(sample.clone()).unwrap();
        assert!(!queue.empty());
        assert_eq!(sample, queue.try_pop().unwrap());
        assert!(queue.empty());
    }

    #[test]
    fn should_reject_when_full_and_accept_after_pop() {
        let mut queue = SpscMessageQueue::<u64>::new(4);
        for i in 0..4 {
            queue.try_push(i).unwrap();
        }

        let err = queue.try_push(4).unwrap_err();
        assert_eq!(Error::Full, err.error);
        assert_eq!(4, err.into_inner());

        assert_eq!(0, queue.try_pop().unwrap());
        queue.try_push(4).unwrap();

        for i in 1..=4 {
            assert_eq!(i, queue.try_pop().unwrap());
        }
        assert_eq!(Error::Empty, queue.try_pop().unwrap_err());
    }

    #[test]
    fn should_construct_and_destroy_each_value_once() {
        const N: usize = 16;
        let counters = Arc::new(Counters::default());
        let mut queue = SpscMessageQueue::<Tracked>::new(N);

        for id in 0..N {
            queue.try_push(Tracked::new(id, &counters)).unwrap();
        }
        assert_eq!(N, counters.created.load(SeqCst));
        assert_eq!(0, counters.dropped.load(SeqCst));

        let mut popped = Vec::with_capacity(N);
        for id in 0..N {
            let value = queue.try_pop().unwrap();
            assert_eq!(id, value.id);
            popped.push(value);
        }
        // nothing destroyed while the values are held by the consumer
        assert_eq!(0, counters.dropped.load(SeqCst));

        drop(popped);
        assert_eq!(N, counters.dropped.load(SeqCst));

        drop(queue);
        assert_eq!(N, counters.created.load(SeqCst));
        assert_eq!(N, counters.dropped.load(SeqCst));
    }

    #[test]
    fn should_destroy_in_flight_values_on_drop() {
        let counters = Arc::new(Counters::default());
        let mut queue = SpscMessageQueue::<Tracked>::new(4);

        for id in 0..3 {
            queue.try_push(Tracked::new(id, &counters)).unwrap();
        }
        drop(queue.try_pop().unwrap());
        assert_eq!(1, counters.dropped.load(SeqCst));

        drop(queue);
        assert_eq!(3, counters.created.load(SeqCst));
        assert_eq!(3, counters.dropped.load(SeqCst));
    }

    #[test]
    fn should_destroy_in_flight_values_once_both_sides_are_gone() {
        let counters = Arc::new(Counters::default());
        let (mut writer, reader) = SpscMessageQueue::<Tracked>::new(4).split();

        drop(reader);
        writer.try_push(Tracked::new(0, &counters)).unwrap();
        writer.try_push(Tracked::new(1, &counters)).unwrap();
        assert_eq!(0, counters.dropped.load(SeqCst));

        drop(writer);
        assert_eq!(2, counters.dropped.load(SeqCst));
    }

    #[test]
    fn should_drop_rejected_value_only_once() {
        let counters = Arc::new(Counters::default());
        let mut queue = SpscMessageQueue::<Tracked>::new(1);

        queue.try_push(Tracked::new(0, &counters)).unwrap();
        let rejected = queue.try_push(Tracked::new(1, &counters)).unwrap_err();
        assert_eq!(1, rejected.value.id);
        drop(rejected);
        assert_eq!(1, counters.dropped.load(SeqCst));

        drop(queue);
        assert_eq!(2, counters.dropped.load(SeqCst));
    }

    #[test]
    fn should_pop_into_existing_value() {
        let counters = Arc::new(Counters::default());
        let mut queue = SpscMessageQueue::<Tracked>::new(2);
        let mut out = Tracked::new(100, &counters);

        assert_eq!(Error::Empty, queue.try_pop_into(&mut out).unwrap_err());
        assert_eq!(100, out.id);
        assert_eq!(0, counters.dropped.load(SeqCst));

        queue.try_push(Tracked::new(1, &counters)).unwrap();
        queue.try_pop_into(&mut out).unwrap();
        assert_eq!(1, out.id);
        // previous value of `out` was released
        assert_eq!(1, counters.dropped.load(SeqCst));
    }

    #[test]
    fn should_respect_over_aligned_types() {
        let mut queue = SpscMessageQueue::<CacheAligned>::new(3);
        for round in 0..10u8 {
            let value = CacheAligned([round; 64]);
            queue.try_push(value).unwrap();
            let popped = queue.try_pop().unwrap();
            assert_eq!(value, popped);
        }

        let mut slot_queue = SpscQueue::new(message_frame_len::<CacheAligned>());
        let mut slot = slot_queue.acquire_write(payload_len::<CacheAligned>()).unwrap();
        assert_eq!(0, value_ptr::<CacheAligned>(slot.as_mut_ptr()) as usize % 64);
    }

    #[test]
    fn should_transport_zero_sized_values() {
        let mut queue = SpscMessageQueue::<()>::new(3);
        queue.try_push(()).unwrap();
        queue.try_push(()).unwrap();
        queue.try_push(()).unwrap();
        assert_eq!(Error::Full, queue.try_push(()).unwrap_err().error);

        for _ in 0..3 {
            queue.try_pop().unwrap();
        }
        assert!(queue.empty());
    }

    #[test]
    fn should_preserve_order_across_wraps() {
        let mut queue = SpscMessageQueue::<String>::new(3);
        let mut next_pop = 0usize;

        for i in 0..100usize {
            if let Err(err) = queue.try_push(i.to_string()) {
                assert_eq!(Error::Full, err.error);
                assert_eq!(next_pop.to_string(), queue.try_pop().unwrap());
                next_pop += 1;
                queue.try_push(err.into_inner()).unwrap();
            }
        }
        while let Ok(value) = queue.try_pop() {
            assert_eq!(next_pop.to_string(), value);
            next_pop += 1;
        }
        assert_eq!(100, next_pop);
    }

    #[test]
    fn should_transfer_owned_values_between_threads() {
        const NUM_MESSAGES: u64 = 10_000;
        let (mut writer, mut reader) = SpscMessageQueue::<Box<u64>>::new(16).split();

        let producer = std::thread::spawn(move || {
            for i in 0..NUM_MESSAGES {
                let mut value = Box::new(i);
                while let Err(err) = writer.try_push(value) {
                    assert_eq!(Error::Full, err.error);
                    value = err.into_inner();
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < NUM_MESSAGES {
            match reader.try_pop() {
                Ok(value) => {
                    assert_eq!(expected, *value);
                    expected += 1;
                }
                Err(Error::Empty) => std::hint::spin_loop(),
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        producer.join().unwrap();
        assert!(reader.empty());
    }
}
