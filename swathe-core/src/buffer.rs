//! GeoSample Buffer
//!
//! Accumulates validated position samples for one vehicle between commit
//! points. The buffer is strictly FIFO, never reorders, and never contacts
//! storage; draining it is the trail session's job at commit boundaries.
//!
//! Timestamp ordering is enforced across the whole trail, not just the
//! current batch: the last accepted timestamp survives a `drain()`.

use crate::sample::{GeoSample, InvalidSample};

/// Default hard bound on buffered samples; exceeding it aborts the trail.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

/// FIFO buffer of validated samples for one trail.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Vec<GeoSample>,
    last_timestamp: Option<u64>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        SampleBuffer {
            samples: Vec::new(),
            last_timestamp: None,
            capacity,
        }
    }

    /// Validate and append a sample.
    ///
    /// Rejects samples with a timestamp at or before the last accepted one,
    /// and samples with non-finite or out-of-range fields. Rejected samples
    /// are dropped; they never abort a healthy trail.
    pub fn accept(&mut self, sample: GeoSample) -> Result<(), InvalidSample> {
        sample.validate()?;
        if let Some(last) = self.last_timestamp {
            if sample.timestamp <= last {
                return Err(InvalidSample::OutOfOrder {
                    last,
                    got: sample.timestamp,
                });
            }
        }
        self.last_timestamp = Some(sample.timestamp);
        self.samples.push(sample);
        Ok(())
    }

    /// Atomically take and clear the buffered sequence, in accept order.
    ///
    /// The timestamp watermark is kept so ordering stays enforced across
    /// commit boundaries.
    pub fn drain(&mut self) -> Vec<GeoSample> {
        std::mem::take(&mut self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once the buffered count reaches the hard bound. The owner must
    /// treat this as fatal for the trail (`BufferOverflow`).
    pub fn is_over_capacity(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Timestamp of the last accepted sample, if any.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        SampleBuffer::new(DEFAULT_BUFFER_CAPACITY)
    }
}
