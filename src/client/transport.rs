//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! The device/protocol client library this crate sits on top of.
//!
//! An implementation owns the actual AMS link (router, TCP, or a simulation)
//! and exposes the synchronous ADS services below. Notification streams it
//! receives for a target are pushed into the producer attached for that
//! target, from the implementation's own receive thread.

use std::time::Duration;

use crate::error::AdsError;
use crate::notification::NotificationProducer;

use super::client_types::{AmsAddr, AmsNetId, DeviceInfo, DeviceState, NotificationAttrib};


pub trait AdsTransport : Send + Sync {

    /// Add a route to the target system.
    fn add_route(&self, net_id : &AmsNetId, host : &str) -> Result<(), AdsError>;

    fn del_route(&self, net_id : &AmsNetId) -> Result<(), AdsError>;

    /// Open a local port. Every other request is issued through an open port.
    fn open_port(&self) -> Result<u16, AdsError>;

    /// Close a local port. All notifications registered through it are dropped.
    fn close_port(&self, port : u16) -> Result<(), AdsError>;

    /// Timeout for synchronous requests issued through `port`.
    fn set_timeout(&self, port : u16, timeout : Duration) -> Result<(), AdsError>;

    fn read_state(&self, port : u16, target : &AmsAddr) -> Result<DeviceState, AdsError>;

    fn read_device_info(&self, port : u16, target : &AmsAddr) -> Result<DeviceInfo, AdsError>;

    /// Read `data.len()` bytes at (group, offset). Returns the number of bytes read.
    fn read(&self, port : u16, target : &AmsAddr, group : u32, offset : u32, data : &mut [u8]) -> Result<u32, AdsError>;

    fn write(&self, port : u16, target : &AmsAddr, group : u32, offset : u32, data : &[u8]) -> Result<(), AdsError>;

    /// Combined write-then-read request, used by the symbol services.
    fn read_write(
        &self,
        port : u16,
        target : &AmsAddr,
        group : u32,
        offset : u32,
        read_data : &mut [u8],
        write_data : &[u8]
    ) -> Result<u32, AdsError>;

    /// Register a device notification. Samples arrive through the producer
    /// attached for `target`, tagged with the returned handle.
    fn add_device_notification(
        &self,
        port : u16,
        target : &AmsAddr,
        group : u32,
        offset : u32,
        attrib : &NotificationAttrib
    ) -> Result<u32, AdsError>;

    fn del_device_notification(&self, port : u16, target : &AmsAddr, handle : u32) -> Result<(), AdsError>;

    /// Route the notification stream of `target` into `producer`.
    fn attach_notification_stream(&self, target : &AmsAddr, producer : NotificationProducer);
}
