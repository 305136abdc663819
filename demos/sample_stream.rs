use log::{info, warn};
use rand::{Rng, thread_rng};
use spscq::SpscMessageQueue;
use spscq::error::Error;
use spscq::shutdown::Shutdown;
use std::time::{Duration, Instant};

/// This example simulates a radio receiver: an acquisition thread hands blocks of IQ samples to
/// a processing thread through the typed queue. Blocks own heap buffers, so every block is
/// moved through the queue rather than copied. Run with `RUST_LOG=info`.

const QUEUE_DEPTH: usize = 32;

/// Host side sample format.
#[derive(Debug, Clone, Copy)]
enum SampleFormat {
    /// 16-bit signed integer complex, IQ interleaved.
    Ic16,
    /// 32-bit float complex, IQ interleaved.
    Fc32,
}

/// How long a stream runs for.
#[derive(Debug, Clone, Copy)]
enum SampleLength {
    NumSamples(usize),
    Duration(Duration),
}

#[derive(Debug)]
enum Samples {
    Ic16(Vec<(i16, i16)>),
    Fc32(Vec<(f32, f32)>),
}

#[derive(Debug)]
struct SampleBlock {
    seq: u64,
    samples: Samples,
}

impl SampleBlock {
    fn acquire(seq: u64, format: SampleFormat, len: usize) -> Self {
        let mut rng = thread_rng();
        let samples = match format {
            SampleFormat::Ic16 => Samples::Ic16(
                (0..len)
                    .map(|_| (rng.gen_range(-512..512), rng.gen_range(-512..512)))
                    .collect(),
            ),
            SampleFormat::Fc32 => Samples::Fc32(
                (0..len)
                    .map(|_| (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                    .collect(),
            ),
        };
        Self { seq, samples }
    }

    fn len(&self) -> usize {
        match &self.samples {
            Samples::Ic16(samples) => samples.len(),
            Samples::Fc32(samples) => samples.len(),
        }
    }

    fn power(&self) -> f64 {
        let sum: f64 = match &self.samples {
            Samples::Ic16(samples) => samples
                .iter()
                .map(|(i, q)| (*i as f64 / 512.0).powi(2) + (*q as f64 / 512.0).powi(2))
                .sum(),
            Samples::Fc32(samples) => samples.iter().map(|(i, q)| (*i as f64).powi(2) + (*q as f64).powi(2)).sum(),
        };
        sum / self.len().max(1) as f64
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // usage: sample_stream [ic16|fc32] [duration_ms]
    let format = match std::env::args().nth(1).as_deref() {
        Some("ic16") => SampleFormat::Ic16,
        _ => SampleFormat::Fc32,
    };
    let length = match std::env::args().nth(2).and_then(|ms| ms.parse().ok()) {
        Some(ms) => SampleLength::Duration(Duration::from_millis(ms)),
        None => SampleLength::NumSamples(1024 * 1024),
    };
    let block_len = 1024;
    info!("streaming {format:?} samples, {length:?}");

    let shutdown = Shutdown::new();
    let (mut tx, mut rx) = SpscMessageQueue::<SampleBlock>::new(QUEUE_DEPTH).split();

    let acquisition = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let mut produced = 0usize;
            let mut overflows = 0usize;
            let mut seq = 0;
            loop {
                let done = match length {
                    SampleLength::NumSamples(n) => produced >= n,
                    SampleLength::Duration(d) => start.elapsed() >= d,
                };
                if done || shutdown.is_stopped() {
                    break;
                }

                // hardware does not wait, a block that does not fit is dropped
                let block = SampleBlock::acquire(seq, format, block_len);
                match tx.try_push(block) {
                    Ok(()) => produced += block_len,
                    Err(err) if err.error == Error::Full => overflows += 1,
                    Err(err) => return Err(anyhow::anyhow!(err.error)),
                }
                seq += 1;
            }
            if overflows > 0 {
                warn!("dropped {overflows} blocks");
            }
            info!("acquired {produced} samples in {:?}", start.elapsed());
            shutdown.stop();
            Ok(produced)
        })
    };

    let mut consumed = 0usize;
    let mut last_seq = None;
    loop {
        match rx.pop(&shutdown) {
            Ok(block) => {
                if let Some(last) = last_seq {
                    assert!(block.seq > last, "blocks out of order");
                }
                last_seq = Some(block.seq);
                consumed += block.len();
                info!("block {} power {:.3}", block.seq, block.power());
            }
            Err(Error::Disconnected) => break,
            Err(err) => return Err(err.into()),
        }
    }

    let produced = acquisition.join().unwrap()?;
    assert_eq!(produced, consumed);
    println!("consumed {consumed} samples");

    Ok(())
}
