//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Device notification plumbing: the byte ring filled by the transport, the
//! stream layout, and the per-connection dispatcher that routes samples to
//! registered subscriptions.

pub mod ring_buffer;
pub mod wake;
pub mod frame;
pub mod dispatcher;

pub use ring_buffer::{RingBuffer, RingError, DEFAULT_RING_CAPACITY};
pub use wake::WakeSignal;
pub use frame::{filetime_to_system_time, system_time_to_filetime, NotificationStreamBuilder};
pub use dispatcher::{
    DispatcherState, Notification, NotificationCallback, NotificationDispatcher, NotificationProducer
};
