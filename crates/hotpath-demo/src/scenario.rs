//! The walkthrough: two dummy threads, two small pools, then a delayed
//! consumer draining a bounded queue.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_utils::Backoff;
use hotpath::{FailurePolicy, ObjectPool, ThreadError, channel, create_and_start_thread};
use tracing::{info, warn};

/// Knobs for [`run`]. Defaults mirror the classic walkthrough at a faster pace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    pub queue_capacity: usize,
    pub messages: usize,
    pub pool_capacity: usize,
    /// How long the consumer (and the pinned dummy thread) waits before starting.
    pub consumer_delay: Duration,
    /// Pause after each produced and each consumed record.
    pub interval: Duration,
    pub pin_core: Option<usize>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 20,
            messages: 50,
            pool_capacity: 5,
            consumer_delay: Duration::from_millis(500),
            interval: Duration::from_millis(20),
            pin_core: Some(1),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Record(pub [i32; 3]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub dummy_outputs: (i32, i32),
    pub pool_live: (usize, usize),
    pub received: Vec<Record>,
}

pub fn run(config: &DemoConfig) -> Result<Report> {
    let dummy_outputs = run_threads(config)?;
    let pool_live = run_pools(config.pool_capacity)?;
    let received = run_queue(config)?;
    Ok(Report {
        dummy_outputs,
        pool_live,
        received,
    })
}

fn dummy(a: i32, b: i32, pause: Option<Duration>) -> i32 {
    let output = a * b;
    info!(a, b, output, "Dummy function");
    if let Some(pause) = pause {
        info!(?pause, "Dummy function sleeping");
        thread::sleep(pause);
    }
    info!("Dummy function done");
    output
}

/// Start one unpinned and one pinned dummy thread and wait for both. A core
/// that can't be pinned falls back to an unpinned thread.
pub fn run_threads(config: &DemoConfig) -> Result<(i32, i32)> {
    let pause = config.consumer_delay;

    let first = create_and_start_thread(None, "dummy-1", || dummy(10, 30, None))?;
    let second = match create_and_start_thread(config.pin_core, "dummy-2", move || {
        dummy(20, 51, Some(pause))
    }) {
        Ok(handle) => handle,
        Err(e @ (ThreadError::Affinity { .. } | ThreadError::AffinityUnsupported)) => {
            warn!(error = %e, "Pinning failed, running dummy-2 unpinned");
            create_and_start_thread(None, "dummy-2", move || dummy(20, 51, Some(pause)))?
        }
        Err(e) => return Err(e.into()),
    };

    info!("Waiting for dummy threads");
    Ok((first.join()?, second.join()?))
}

/// Allocate five values into a pool of `f64` and a pool of records, freeing
/// the first of each. Returns the live counts of both pools at the end.
pub fn run_pools(capacity: usize) -> Result<(usize, usize)> {
    let prims = ObjectPool::<f64>::with_policy(capacity, FailurePolicy::Error)?;
    let records = ObjectPool::<Record>::with_policy(capacity, FailurePolicy::Error)?;
    let mut kept = Vec::new();

    for i in 0..5 {
        let prim = prims.allocate(f64::from(i)).context("prim pool")?;
        let record = records
            .allocate(Record([i, i + 1, i + 2]))
            .context("record pool")?;
        info!(value = *prim, slot = prim.index(), "Allocated prim");
        info!(record = ?record.0, slot = record.index(), "Allocated record");

        if i % 5 == 0 {
            info!(value = *prim, slot = prim.index(), "Deallocating prim");
            info!(record = ?record.0, slot = record.index(), "Deallocating record");
            drop(prim);
            drop(record);
        } else {
            kept.push((prim, record));
        }
    }

    Ok((prims.len(), records.len()))
}

/// The `i`-th queued record: `[1, i*10, i*100]`.
fn record_for(i: usize) -> Result<Record> {
    let i = i32::try_from(i).context("message index overflows i32")?;
    let hundreds = i
        .checked_mul(100)
        .with_context(|| format!("message index {i} too large for a record"))?;
    Ok(Record([1, i * 10, hundreds]))
}

/// Produce `messages` records `[1, i*10, i*100]` into a bounded queue while a
/// delayed consumer thread drains them. Returns what the consumer saw.
pub fn run_queue(config: &DemoConfig) -> Result<Vec<Record>> {
    // The consumer waits for every record, so reject an unrepresentable run
    // before it starts.
    if let Some(last) = config.messages.checked_sub(1) {
        record_for(last)?;
    }
    let (mut producer, mut consumer) = channel::<Record>(config.queue_capacity)?;
    let messages = config.messages;
    let delay = config.consumer_delay;
    let interval = config.interval;

    let consumer_thread = create_and_start_thread(None, "consumer", move || {
        thread::sleep(delay);
        let mut received = Vec::with_capacity(messages);
        let backoff = Backoff::new();
        while received.len() < messages {
            let Some(slot) = consumer.read_slot() else {
                backoff.snooze();
                continue;
            };
            let record = *slot;
            slot.commit();
            backoff.reset();
            info!(record = ?record.0, occupancy = consumer.occupancy(), "Consumed record");
            received.push(record);
            thread::sleep(interval);
        }
        info!("Consumer exiting");
        received
    })?;

    let backoff = Backoff::new();
    for i in 0..messages {
        let record = record_for(i)?;
        loop {
            if let Some(mut slot) = producer.write_slot() {
                *slot = record;
                slot.commit();
                break;
            }
            backoff.snooze();
        }
        backoff.reset();
        info!(record = ?record.0, occupancy = producer.occupancy(), "Produced record");
        thread::sleep(interval);
    }

    let received = consumer_thread.join()?;
    info!(count = received.len(), "Queue drained");
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> DemoConfig {
        DemoConfig {
            consumer_delay: Duration::from_millis(5),
            interval: Duration::ZERO,
            pin_core: None,
            ..DemoConfig::default()
        }
    }

    #[test]
    fn delayed_consumer_sees_every_record_in_order() {
        let received = run_queue(&fast()).unwrap();
        assert_eq!(received.len(), 50);
        assert_eq!(received[0], Record([1, 0, 0]));
        assert_eq!(received[49], Record([1, 490, 4900]));
        for (i, record) in (0..).zip(&received) {
            assert_eq!(*record, Record([1, i * 10, i * 100]));
        }
    }

    #[test]
    fn tiny_queue_still_delivers_everything() {
        let config = DemoConfig {
            queue_capacity: 1,
            messages: 200,
            ..fast()
        };
        let received = run_queue(&config).unwrap();
        assert_eq!(received.len(), 200);
        assert!(received.windows(2).all(|w| w[1].0[1] == w[0].0[1] + 10));
    }

    #[test]
    fn record_for_rejects_overflowing_index() {
        assert_eq!(record_for(49).unwrap(), Record([1, 490, 4900]));
        assert_eq!(
            record_for(21_474_836).unwrap(),
            Record([1, 214_748_360, 2_147_483_600])
        );
        let err = record_for(21_474_837).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err:#}");
        assert!(record_for(usize::MAX).is_err());
    }

    #[test]
    fn pools_end_with_four_live_values() {
        assert_eq!(run_pools(5).unwrap(), (4, 4));
    }

    #[test]
    fn undersized_pool_reports_exhaustion() {
        let err = run_pools(3).unwrap_err();
        assert!(format!("{err:#}").contains("out of space"), "{err:#}");
    }

    #[test]
    fn zero_capacity_pool_is_rejected() {
        assert!(run_pools(0).is_err());
    }

    #[test]
    fn dummy_threads_report_products() {
        assert_eq!(run_threads(&fast()).unwrap(), (300, 1020));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unpinnable_core_falls_back() {
        let config = DemoConfig {
            pin_core: Some(1 << 20),
            ..fast()
        };
        assert_eq!(run_threads(&config).unwrap(), (300, 1020));
    }

    #[test]
    fn zero_capacity_queue_is_rejected() {
        let config = DemoConfig {
            queue_capacity: 0,
            ..fast()
        };
        assert!(run_queue(&config).is_err());
    }
}
