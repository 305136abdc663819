use anyhow::anyhow;
use log::info;
use rand::{Rng, thread_rng};
use spscq::error::Error;
use spscq::shutdown::Shutdown;
use spscq::{Reader, Writer};

/// Generate random message every 1 millisecond until `count` messages were sent.
pub fn writer(mut writer: Writer, shutdown: Shutdown, count: usize) -> anyhow::Result<()> {
    for _ in 0..count {
        let symbol = thread_rng().gen_range(b'A'..=b'Z');
        let msg_len = thread_rng().gen_range(1..20);
        writer.publish(msg_len, &shutdown, |buf| buf.fill(symbol))?;
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    info!("writer done after {count} messages");
    shutdown.stop();
    Ok(())
}

/// Consume messages produced by the writer. It will also perform payload validation (every
/// payload is made of a single repeated symbol) and sleep for 10 milliseconds in order to
/// let messages pile up.
pub fn reader(mut reader: Reader, shutdown: Shutdown) -> anyhow::Result<usize> {
    let mut total = 0;
    loop {
        let mut count = 0;
        loop {
            match reader.acquire_read() {
                Ok(msg) => {
                    let payload = msg.get_buffer();
                    if !payload.iter().all(|b| *b == payload[0]) {
                        return Err(anyhow!("corrupted payload: {}", String::from_utf8_lossy(payload)));
                    }
                    info!("{}", String::from_utf8_lossy(payload));
                    msg.commit();
                    count += 1;
                }
                Err(Error::Empty) => break,
                Err(err) => return Err(anyhow!(err)),
            }
        }
        total += count;
        if count > 0 {
            info!("batch_size: {count}");
        } else if shutdown.is_stopped() && reader.empty() {
            return Ok(total);
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
