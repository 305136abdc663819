use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spscq::error::Error;
use spscq::shutdown::Shutdown;
use spscq::{SpscMessageQueue, SpscQueue, frame_len};
use std::ops::RangeInclusive;

const SEED: u64 = 0x5eed;
const NUM_MESSAGES: usize = 200_000;

/// Payload of message `seq`: sequence number followed by bytes derived from it.
fn fill(seq: u64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&seq.to_le_bytes());
    for (i, b) in buf[8..].iter_mut().enumerate() {
        *b = (seq as usize + i) as u8;
    }
}

fn verify(seq: u64, buf: &[u8]) {
    assert_eq!(seq, u64::from_le_bytes(buf[..8].try_into().unwrap()), "out of order");
    for (i, b) in buf[8..].iter().enumerate() {
        assert_eq!((seq as usize + i) as u8, *b, "corrupted payload at message {seq}");
    }
}

/// Moves `count` records with lengths drawn from `lengths` between two threads and checks
/// order, length and content of every record on the consumer side.
fn transfer_random_sized_records(capacity: usize, lengths: RangeInclusive<usize>, count: u64) {
    let (mut writer, mut reader) = SpscQueue::new(capacity).split();

    let producer = {
        let lengths = lengths.clone();
        std::thread::spawn(move || {
            // same seed on both sides so the consumer knows the expected lengths
            let mut rng = StdRng::seed_from_u64(SEED);
            for seq in 0..count {
                let len = rng.gen_range(lengths.clone());
                loop {
                    match writer.acquire_write(len) {
                        Ok(mut slot) => {
                            fill(seq, slot.get_buffer_mut());
                            slot.commit();
                            break;
                        }
                        Err(Error::Full) => std::thread::yield_now(),
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            }
            writer
        })
    };

    let mut rng = StdRng::seed_from_u64(SEED);
    let mut seq = 0u64;
    while seq < count {
        match reader.acquire_read() {
            Ok(slot) => {
                let len: usize = rng.gen_range(lengths.clone());
                assert_eq!(len, slot.len());
                verify(seq, slot.get_buffer());
                slot.commit();
                seq += 1;
            }
            Err(Error::Empty) => std::thread::yield_now(),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    let writer = producer.join().unwrap();
    assert!(writer.empty());
    assert!(reader.empty());
    assert_eq!(Error::Empty, reader.acquire_read().unwrap_err());
}

#[test]
fn should_deliver_random_sized_records_in_order() {
    transfer_random_sized_records(4096, 8..=300, NUM_MESSAGES as u64);
}

#[test]
fn should_deliver_records_up_to_max_payload_in_order() {
    const CAPACITY: usize = 1024;
    let max_payload_len = SpscQueue::new(CAPACITY).max_payload_len();
    assert_eq!(CAPACITY - 8, max_payload_len);
    transfer_random_sized_records(CAPACITY, 8..=max_payload_len, 50_000);
}

#[test]
fn should_fit_exactly_k_records() {
    const K: usize = 5;
    let mut queue = SpscQueue::new(K * frame_len(100));

    for _ in 0..K {
        queue.acquire_write(100).unwrap().commit();
    }
    assert_eq!(Error::Full, queue.acquire_write(100).unwrap_err());

    queue.acquire_read().unwrap().commit();
    queue.acquire_write(100).unwrap().commit();
    assert_eq!(Error::Full, queue.acquire_write(100).unwrap_err());

    for _ in 0..K {
        queue.acquire_read().unwrap().commit();
    }
    assert!(queue.empty());
}

#[test]
fn should_move_owned_values_through_typed_queue() {
    let shutdown = Shutdown::new();
    let (mut writer, mut reader) = SpscMessageQueue::<Vec<u64>>::new(64).split();

    let producer = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            for seq in 0..20_000u64 {
                let block = (seq..seq + (seq % 17)).collect::<Vec<_>>();
                writer.push(block, &shutdown).unwrap();
            }
            shutdown.stop();
        })
    };

    let mut seq = 0u64;
    loop {
        match reader.pop(&shutdown) {
            Ok(block) => {
                assert_eq!((seq..seq + (seq % 17)).collect::<Vec<_>>(), block);
                seq += 1;
            }
            Err(err) => {
                assert_eq!(Error::Disconnected, err);
                break;
            }
        }
    }

    producer.join().unwrap();
    assert_eq!(20_000, seq);
}
