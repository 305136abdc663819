use crate::common::{reader, writer};
use spscq::SpscQueue;
use spscq::shutdown::Shutdown;

mod common;

/// This example will demonstrate in-process communication between reader and writer that are
/// running on separate threads. Run with `RUST_LOG=info` to see the messages.

const QUEUE_CAPACITY: usize = 256;
const NUM_MESSAGES: usize = 1000;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let shutdown = Shutdown::new();
    let (tx, rx) = SpscQueue::new(QUEUE_CAPACITY).split();

    let writer_task = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || writer(tx, shutdown, NUM_MESSAGES))
    };
    let reader_task = std::thread::spawn(move || reader(rx, shutdown));

    writer_task.join().unwrap()?;
    let received = reader_task.join().unwrap()?;
    assert_eq!(NUM_MESSAGES, received);
    println!("received {received} messages");

    Ok(())
}
