//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Connection to the ADS router through an `AdsTransport`. Wraps the raw
//! services into the typed requests the parameter driver needs: symbol
//! information, symbol handles, reads and writes, and device notifications.
//!
//! All wire calls go through the local port held here, guarded by a lock
//! that is separate from any parameter bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use zerocopy::FromBytes;

use crate::error::{AdsError, ADSERR_CLIENT_PORTNOTOPEN, ADSERR_DEVICE_INVALIDSIZE};
use crate::notification::NotificationProducer;

use super::ads_data::vec_to_string;
use super::client_types::{
    AdsSymbolEntry, AmsAddr, AmsNetId, DeviceInfo, DeviceState, NotificationAttrib,
    ADSIGRP_SYM_HNDBYNAME, ADSIGRP_SYM_INFOBYNAMEEX, ADSIGRP_SYM_RELEASEHND, ADSIGRP_SYM_VALBYHND
};
use super::transport::AdsTransport;


/// Largest INFOBYNAMEEX response we accept: header plus three strings.
const SYMBOL_INFO_BUFFER_LEN : usize = 0xFFFF;


/// Location and type of a symbol in the target PLC, as reported by the PLC.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdsSymbolInfo {
    pub name : String,
    pub group_index : u32,
    pub index_offset : u32,
    /// Size of the symbol in bytes.
    pub size : u32,
    /// Raw ADS data type id.
    pub type_id : u32,
    pub type_name : String,
    pub comment : String
}

impl AdsSymbolInfo {

    /// Parse an INFOBYNAMEEX response.
    fn parse(buffer : &[u8]) -> Option<Self> {
        let entry = AdsSymbolEntry::read_from_prefix(buffer)?;

        // Copy out of the packed struct before use.
        let group = entry.group;
        let offset = entry.offset;
        let size = entry.size;
        let data_type = entry.data_type;
        let name_length = entry.name_length as usize;
        let type_length = entry.type_length as usize;
        let comment_length = entry.comment_length as usize;

        let name_start = AdsSymbolEntry::HEADER_LEN;
        let type_start = name_start + name_length + 1;
        let comment_start = type_start + type_length + 1;

        let name = buffer.get(name_start .. name_start + name_length)?;
        let type_name = buffer.get(type_start .. type_start + type_length)?;
        let comment = buffer.get(comment_start .. comment_start + comment_length).unwrap_or(&[]);

        Some(Self {
            name : vec_to_string(name).ok()?,
            group_index : group,
            index_offset : offset,
            size,
            type_id : data_type,
            type_name : vec_to_string(type_name).ok()?,
            comment : vec_to_string(comment).unwrap_or_default()
        })
    }
}


struct WireState {
    /// Local port to the router. None while disconnected.
    port : Option<u16>
}


pub struct AdsConnection {
    transport : Arc<dyn AdsTransport>,
    wire : Mutex<WireState>,
    timeout : Duration
}

impl AdsConnection {

    pub fn new(transport : Arc<dyn AdsTransport>, timeout : Duration) -> Self {
        Self {
            transport,
            wire : Mutex::new(WireState { port : None }),
            timeout
        }
    }

    pub fn transport(&self) -> &Arc<dyn AdsTransport> {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.wire.lock().port.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.wire.lock().port
    }

    /// Open the local port and apply the request timeout. Opening an
    /// already open connection returns the existing port.
    pub fn open(&self) -> Result<u16, AdsError> {
        let mut wire = self.wire.lock();

        if let Some(port) = wire.port {
            return Ok(port);
        }

        let port = self.transport.open_port()?;
        if let Err(err) = self.transport.set_timeout(port, self.timeout) {
            log::warn!("Failed to set timeout of {:?} on local port {}: {}", self.timeout, port, err);
        }

        log::info!("Opened local ADS port {}", port);
        wire.port = Some(port);
        return Ok(port);
    }

    /// Close the local port. Every notification registered through it is
    /// dropped by the router.
    pub fn close(&self) -> Result<(), AdsError> {
        let mut wire = self.wire.lock();

        if let Some(port) = wire.port.take() {
            log::info!("Closing local ADS port {}", port);
            return self.transport.close_port(port);
        }

        return Ok(());
    }

    /// Run a request through the open local port.
    fn with_port<R>(&self, request : impl FnOnce(&dyn AdsTransport, u16) -> Result<R, AdsError>) -> Result<R, AdsError> {
        let wire = self.wire.lock();
        match wire.port {
            Some(port) => request(self.transport.as_ref(), port),
            None => Err(AdsError::new(ADSERR_CLIENT_PORTNOTOPEN)),
        }
    }

    pub fn add_route(&self, net_id : &AmsNetId, host : &str) -> Result<(), AdsError> {
        log::info!("Adding route to {} at {}", net_id, host);
        return self.transport.add_route(net_id, host);
    }

    pub fn del_route(&self, net_id : &AmsNetId) -> Result<(), AdsError> {
        return self.transport.del_route(net_id);
    }

    pub fn read_state(&self, target : &AmsAddr) -> Result<DeviceState, AdsError> {
        self.with_port(|t, port| t.read_state(port, target))
    }

    pub fn read_device_info(&self, target : &AmsAddr) -> Result<DeviceInfo, AdsError> {
        self.with_port(|t, port| t.read_device_info(port, target))
    }

    /// Read exactly `data.len()` bytes from (group, offset).
    pub fn read(&self, target : &AmsAddr, group : u32, offset : u32, data : &mut [u8]) -> Result<(), AdsError> {
        let read = self.with_port(|t, port| t.read(port, target, group, offset, data))?;

        if read as usize != data.len() {
            log::warn!(
                "Short read from {} at {:#x}:{:#x}: {} of {} bytes",
                target, group, offset, read, data.len()
            );
            return Err(AdsError::new(ADSERR_DEVICE_INVALIDSIZE));
        }

        return Ok(());
    }

    pub fn write(&self, target : &AmsAddr, group : u32, offset : u32, data : &[u8]) -> Result<(), AdsError> {
        self.with_port(|t, port| t.write(port, target, group, offset, data))
    }

    /// Upload the location and type of a symbol from the PLC.
    pub fn get_symbol_info(&self, target : &AmsAddr, symbol_name : &str) -> Result<AdsSymbolInfo, AdsError> {
        let mut buffer = vec![0u8; SYMBOL_INFO_BUFFER_LEN];

        let read = self.with_port(|t, port| {
            t.read_write(port, target, ADSIGRP_SYM_INFOBYNAMEEX, 0, &mut buffer, symbol_name.as_bytes())
        })?;

        let len = (read as usize).min(buffer.len());
        match AdsSymbolInfo::parse(&buffer[..len]) {
            Some(info) => Ok(info),
            None => {
                log::error!("Malformed symbol information for {} ({} bytes)", symbol_name, len);
                Err(AdsError::new(ADSERR_DEVICE_INVALIDSIZE))
            }
        }
    }

    /// Acquire a handle for a symbol by name.
    pub fn get_handle_by_name(&self, target : &AmsAddr, symbol_name : &str) -> Result<u32, AdsError> {
        let mut handle = [0u8; 4];

        let read = self.with_port(|t, port| {
            t.read_write(port, target, ADSIGRP_SYM_HNDBYNAME, 0, &mut handle, symbol_name.as_bytes())
        })?;

        if read as usize != handle.len() {
            return Err(AdsError::new(ADSERR_DEVICE_INVALIDSIZE));
        }

        return Ok(u32::from_le_bytes(handle));
    }

    pub fn release_handle(&self, target : &AmsAddr, handle : u32) -> Result<(), AdsError> {
        self.with_port(|t, port| t.write(port, target, ADSIGRP_SYM_RELEASEHND, 0, &handle.to_le_bytes()))
    }

    pub fn read_by_handle(&self, target : &AmsAddr, handle : u32, data : &mut [u8]) -> Result<(), AdsError> {
        self.read(target, ADSIGRP_SYM_VALBYHND, handle, data)
    }

    pub fn write_by_handle(&self, target : &AmsAddr, handle : u32, data : &[u8]) -> Result<(), AdsError> {
        self.write(target, ADSIGRP_SYM_VALBYHND, handle, data)
    }

    pub fn add_device_notification(
        &self,
        target : &AmsAddr,
        group : u32,
        offset : u32,
        attrib : &NotificationAttrib
    ) -> Result<u32, AdsError> {
        self.with_port(|t, port| t.add_device_notification(port, target, group, offset, attrib))
    }

    pub fn del_device_notification(&self, target : &AmsAddr, handle : u32) -> Result<(), AdsError> {
        self.with_port(|t, port| t.del_device_notification(port, target, handle))
    }

    /// Route the notification stream of `target` into a dispatcher.
    pub fn attach(&self, target : &AmsAddr, producer : NotificationProducer) {
        self.transport.attach_notification_stream(target, producer);
    }
}
