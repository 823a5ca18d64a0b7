//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Per-connection notification dispatcher.
//!
//! One dispatcher exists per target (Net ID + ADS port). It owns a ring that
//! the transport fills with notification streams, and a thread that decodes
//! each stream and routes every sample to the subscription registered under
//! the sample's handle.
//!
//! A sample whose size differs from what the subscription expects means the
//! stream can no longer be trusted: the payload is discarded and the dispatch
//! loop stops for good. Samples for unknown handles (deleted subscriptions)
//! are skipped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};

use crate::client::adsclient::AdsConnection;
use crate::client::client_types::AmsAddr;
use crate::error::{AdsError, ADSERR_CLIENT_SYNCTIMEOUT};

use super::ring_buffer::{RingBuffer, RingError};
use super::wake::WakeSignal;


/// Invoked on the dispatcher thread with (handle, timestamp, payload).
pub type NotificationCallback = Box<dyn Fn(u32, u64, &[u8]) + Send + Sync>;


/// A registered subscription: the sample size it expects and where samples go.
pub struct Notification {
    size : u32,
    callback : NotificationCallback
}

impl Notification {

    pub fn new<F>(size : u32, callback : F) -> Self
    where
        F : Fn(u32, u64, &[u8]) + Send + Sync + 'static
    {
        Self { size, callback : Box::new(callback) }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Consume exactly `size` bytes from the ring and hand them to the callback.
    fn notify(&self, handle : u32, timestamp : u64, ring : &RingBuffer) -> Result<(), RingError> {
        let mut payload = vec![0u8; self.size as usize];
        ring.read_exact(&mut payload)?;
        (self.callback)(handle, timestamp, &payload);
        return Ok(());
    }
}


/// Write side of a dispatcher, handed to the transport.
#[derive(Clone)]
pub struct NotificationProducer {
    ring : Arc<RingBuffer>,
    wake : Arc<WakeSignal>
}

impl NotificationProducer {

    /// Queue one complete notification stream. A stream that does not fit
    /// is dropped.
    pub fn push(&self, stream : &[u8]) -> Result<(), RingError> {
        match self.ring.write(stream) {
            Ok(()) => {
                self.wake.release();
                return Ok(());
            },
            Err(RingError::Full { needed, free }) => {
                log::warn!("Notification receive buffer is full, dropping {} bytes ({} free).", needed, free);
                return Err(RingError::Full { needed, free });
            },
            Err(err) => {
                log::debug!("Notification stream dropped: {}", err);
                return Err(err);
            }
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Closing,
    Stopped
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    Complete,
    /// A sample size disagreed with its subscription.
    Desynchronized
}


type Registry = ReentrantMutex<RefCell<HashMap<u32, Arc<Notification>>>>;

struct DispatcherShared {
    target : AmsAddr,
    ring : Arc<RingBuffer>,
    wake : Arc<WakeSignal>,
    registry : Registry,
    state : Mutex<DispatcherState>,
    desynchronized : AtomicBool
}

impl DispatcherShared {

    fn new(target : AmsAddr, ring_capacity : usize) -> Self {
        Self {
            target,
            ring : Arc::new(RingBuffer::new(ring_capacity)),
            wake : Arc::new(WakeSignal::new()),
            registry : ReentrantMutex::new(RefCell::new(HashMap::new())),
            state : Mutex::new(DispatcherState::Running),
            desynchronized : AtomicBool::new(false)
        }
    }

    /// Decode one stream from the ring.
    ///
    /// The registry lock is held while a sample's callback runs, so a
    /// subscription removed from another thread never sees a callback after
    /// removal returns.
    fn process_frame(&self) -> Result<FrameOutcome, RingError> {
        let ring = &*self.ring;

        let length = ring.read_u32()? as usize;
        let num_stamps = ring.read_u32()?;
        let mut consumed : usize = 4;

        for _ in 0 .. num_stamps {
            let timestamp = ring.read_u64()?;
            let num_samples = ring.read_u32()?;
            consumed += 12;

            for _ in 0 .. num_samples {
                let handle = ring.read_u32()?;
                let size = ring.read_u32()?;
                consumed += 8 + size as usize;

                let guard = self.registry.lock();
                let found = guard.borrow().get(&handle).cloned();

                match found {
                    Some(notification) => {
                        if notification.size() != size {
                            log::error!(
                                "Notification sample size {} for handle {} on {} doesn't match expected {}. Stopping dispatch.",
                                size,
                                handle,
                                self.target,
                                notification.size()
                            );
                            ring.skip(size as usize)?;
                            return Ok(FrameOutcome::Desynchronized);
                        }
                        notification.notify(handle, timestamp, ring)?;
                    },
                    None => {
                        log::debug!("Skipping {} bytes for unknown notification handle {} on {}", size, handle, self.target);
                        ring.skip(size as usize)?;
                    }
                }
            }
        }

        if consumed < length {
            ring.skip(length - consumed)?;
        }
        else if consumed > length {
            log::warn!("Notification stream on {} declared {} bytes but carried {}.", self.target, length, consumed);
        }

        return Ok(FrameOutcome::Complete);
    }

    fn run(&self) {
        log::info!("Notification dispatcher for {} started.", self.target);

        while self.wake.acquire() {
            match self.process_frame() {
                Ok(FrameOutcome::Complete) => {},
                Ok(FrameOutcome::Desynchronized) => {
                    self.desynchronized.store(true, Ordering::SeqCst);
                    break;
                },
                Err(err) => {
                    log::debug!("Notification dispatcher for {} interrupted: {}", self.target, err);
                    break;
                }
            }
        }

        // Nobody drains the ring from here on.
        self.ring.close();
        *self.state.lock() = DispatcherState::Stopped;
        log::info!("Notification dispatcher for {} stopped.", self.target);
    }
}



pub struct NotificationDispatcher {
    shared : Arc<DispatcherShared>,
    connection : Arc<AdsConnection>,
    thread : Mutex<Option<JoinHandle<()>>>
}

impl NotificationDispatcher {

    /// Create the dispatcher for `target` and start its thread.
    pub fn new(target : AmsAddr, connection : Arc<AdsConnection>, ring_capacity : usize) -> Result<Self, std::io::Error> {
        let shared = Arc::new(DispatcherShared::new(target, ring_capacity));

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("ads-notify-{}", target.port))
            .spawn(move || thread_shared.run())?;

        Ok(Self {
            shared,
            connection,
            thread : Mutex::new(Some(handle))
        })
    }

    pub fn target(&self) -> AmsAddr {
        self.shared.target
    }

    pub fn producer(&self) -> NotificationProducer {
        NotificationProducer {
            ring : self.shared.ring.clone(),
            wake : self.shared.wake.clone()
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    /// True once the loop stopped because of a sample size mismatch.
    pub fn is_desynchronized(&self) -> bool {
        self.shared.desynchronized.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.registry.lock().borrow().len()
    }

    pub fn has_subscription(&self, handle : u32) -> bool {
        self.shared.registry.lock().borrow().contains_key(&handle)
    }

    /// Register a subscription under its wire handle. Returns false, without
    /// registering, when the dispatch loop is no longer running.
    pub fn add_subscription(&self, handle : u32, notification : Notification) -> bool {
        if !self.is_running() {
            log::warn!("Dispatcher for {} is not running, subscription {} not registered.", self.shared.target, handle);
            return false;
        }

        let guard = self.shared.registry.lock();
        guard.borrow_mut().insert(handle, Arc::new(notification));
        return true;
    }

    /// Remove a subscription and delete it on the wire.
    ///
    /// Waits at most `drain_timeout` for a callback in progress on the
    /// dispatcher thread to finish. May be called from inside a callback.
    pub fn remove_subscription(&self, handle : u32, drain_timeout : Duration) -> Result<(), AdsError> {
        {
            let guard = match self.shared.registry.try_lock_for(drain_timeout) {
                Some(guard) => guard,
                None => {
                    log::warn!("Timed out draining notification {} on {}", handle, self.shared.target);
                    return Err(AdsError::new(ADSERR_CLIENT_SYNCTIMEOUT));
                }
            };
            guard.borrow_mut().remove(&handle);
        }

        return self.connection.del_device_notification(&self.shared.target, handle);
    }

    /// Stop the dispatch thread. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == DispatcherState::Running {
                *state = DispatcherState::Closing;
            }
        }

        self.shared.wake.close();
        self.shared.ring.close();

        if let Some(handle) = self.thread.lock().take() {
            // The last owner may be a callback running on the dispatch thread itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Notification dispatcher thread for {} panicked.", self.shared.target);
            }
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::client_types::AmsNetId;
    use crate::notification::frame::NotificationStreamBuilder;
    use std::sync::Mutex as StdMutex;

    fn shared_with(handles : &[(u32, u32)], log : Arc<StdMutex<Vec<(u32, u64, Vec<u8>)>>>) -> DispatcherShared {
        let shared = DispatcherShared::new(AmsAddr::new(AmsNetId::default(), 851), 1024);
        for &(handle, size) in handles {
            let log = log.clone();
            let notification = Notification::new(size, move |h, ts, data| {
                log.lock().unwrap().push((h, ts, data.to_vec()));
            });
            shared.registry.lock().borrow_mut().insert(handle, Arc::new(notification));
        }
        shared
    }

    #[test]
    fn delivers_in_stamp_then_sample_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let shared = shared_with(&[(1, 2), (2, 1)], log.clone());

        let stream = NotificationStreamBuilder::new()
            .stamp(10)
            .sample(1, &[1, 0])
            .sample(2, &[9])
            .stamp(20)
            .sample(2, &[8])
            .build();
        shared.ring.write(&stream).unwrap();

        assert_eq!(shared.process_frame().unwrap(), FrameOutcome::Complete);
        assert_eq!(*log.lock().unwrap(), vec![
            (1, 10, vec![1, 0]),
            (2, 10, vec![9]),
            (2, 20, vec![8]),
        ]);
        assert_eq!(shared.ring.bytes_used(), 0);
    }

    #[test]
    fn unknown_handle_is_skipped() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let shared = shared_with(&[(5, 4)], log.clone());

        let stream = NotificationStreamBuilder::new()
            .stamp(1)
            .sample(99, &[1, 2, 3, 4, 5, 6])
            .sample(5, &[4, 0, 0, 0])
            .build();
        shared.ring.write(&stream).unwrap();

        assert_eq!(shared.process_frame().unwrap(), FrameOutcome::Complete);
        assert_eq!(*log.lock().unwrap(), vec![(5, 1, vec![4, 0, 0, 0])]);
    }

    #[test]
    fn size_mismatch_desynchronizes() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let shared = shared_with(&[(7, 4)], log.clone());

        let stream = NotificationStreamBuilder::new()
            .stamp(1)
            .sample(7, &[0; 8])
            .sample(7, &[1, 0, 0, 0])
            .build();
        shared.ring.write(&stream).unwrap();

        assert_eq!(shared.process_frame().unwrap(), FrameOutcome::Desynchronized);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn trailing_bytes_inside_declared_length_are_skipped() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let shared = shared_with(&[(3, 1)], log.clone());

        let mut stream = NotificationStreamBuilder::new().stamp(4).sample(3, &[6]).build();
        let declared = u32::from_le_bytes([stream[0], stream[1], stream[2], stream[3]]) + 3;
        stream[..4].copy_from_slice(&declared.to_le_bytes());
        stream.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        shared.ring.write(&stream).unwrap();
        shared.ring.write(&NotificationStreamBuilder::new().stamp(5).sample(3, &[7]).build()).unwrap();

        assert_eq!(shared.process_frame().unwrap(), FrameOutcome::Complete);
        assert_eq!(shared.process_frame().unwrap(), FrameOutcome::Complete);
        assert_eq!(*log.lock().unwrap(), vec![(3, 4, vec![6]), (3, 5, vec![7])]);
    }
}
