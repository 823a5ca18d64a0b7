//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Layout of the device notification stream and helpers to produce it.
//!
//! ```text
//! stream := length:u32 numStamps:u32 stamp*
//! stamp  := timestamp:u64 numSamples:u32 sample*
//! sample := handle:u32 size:u32 payload[size]
//! ```
//!
//! All integers are little-endian. `length` counts the bytes following the
//! length field itself. Timestamps are Windows FILETIME values.

use std::time::{Duration, SystemTime, UNIX_EPOCH};


/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS : u64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC : u64 = 10_000_000;


/// Convert a FILETIME (100ns ticks since 1601) into a SystemTime.
/// Values before the Unix epoch clamp to the epoch.
pub fn filetime_to_system_time(filetime : u64) -> SystemTime {
    let secs = filetime / FILETIME_TICKS_PER_SEC;
    let nanos = (filetime % FILETIME_TICKS_PER_SEC) * 100;

    if secs < FILETIME_UNIX_OFFSET_SECS {
        return UNIX_EPOCH;
    }

    return UNIX_EPOCH + Duration::new(secs - FILETIME_UNIX_OFFSET_SECS, nanos as u32);
}

pub fn system_time_to_filetime(time : SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs() + FILETIME_UNIX_OFFSET_SECS;
    return secs * FILETIME_TICKS_PER_SEC + (since_epoch.subsec_nanos() / 100) as u64;
}


#[derive(Debug, Clone, Default)]
struct Stamp {
    timestamp : u64,
    samples : Vec<(u32, Vec<u8>)>
}


/// Builds one notification stream. Used by transports that receive samples
/// through other means than the raw wire layout, and by tests.
///
/// ```
/// use adsparams_rs::notification::NotificationStreamBuilder;
///
/// let stream = NotificationStreamBuilder::new()
///     .stamp(100)
///     .sample(7, &42i32.to_le_bytes())
///     .build();
/// assert_eq!(stream.len(), 4 + 4 + 12 + 8 + 4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NotificationStreamBuilder {
    stamps : Vec<Stamp>
}

impl NotificationStreamBuilder {

    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new stamp. Following samples belong to it.
    pub fn stamp(mut self, timestamp : u64) -> Self {
        self.stamps.push(Stamp { timestamp, samples : Vec::new() });
        self
    }

    /// Add a sample to the current stamp, opening a stamp with timestamp 0
    /// if there is none yet.
    pub fn sample(mut self, handle : u32, payload : &[u8]) -> Self {
        if self.stamps.is_empty() {
            self.stamps.push(Stamp::default());
        }
        if let Some(stamp) = self.stamps.last_mut() {
            stamp.samples.push((handle, payload.to_vec()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.stamps.len() as u32).to_le_bytes());

        for stamp in &self.stamps {
            body.extend_from_slice(&stamp.timestamp.to_le_bytes());
            body.extend_from_slice(&(stamp.samples.len() as u32).to_le_bytes());
            for (handle, payload) in &stamp.samples {
                body.extend_from_slice(&handle.to_le_bytes());
                body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                body.extend_from_slice(payload);
            }
        }

        let mut stream = Vec::with_capacity(body.len() + 4);
        stream.extend_from_slice(&(body.len() as u32).to_le_bytes());
        stream.extend_from_slice(&body);
        return stream;
    }
}
