//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! An in-process ADS target. Holds a symbol table and process image per ADS
//! port, answers the symbol services, and produces device notification
//! streams the same way the router does. Reachability and the ADS state of
//! each port can be switched at run time, which makes connection handling
//! testable without a PLC.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use zerocopy::AsBytes;

use crate::error::{
    AdsError, ADSERR_CLIENT_PORTNOTOPEN, ADSERR_CLIENT_SYNCTIMEOUT, ADSERR_DEVICE_INVALIDGRP,
    ADSERR_DEVICE_INVALIDOFFSET, ADSERR_DEVICE_INVALIDSIZE, ADSERR_DEVICE_NOTIFYHNDINVALID,
    ADSERR_DEVICE_SYMBOLNOTFOUND, GLOBALERR_MISSING_ROUTE, GLOBALERR_TARGET_PORT
};
use crate::notification::{system_time_to_filetime, NotificationProducer, NotificationStreamBuilder, RingError};

use super::ads_data::AdsDataTypeId;
use super::client_types::{
    AdsState, AdsSymbolEntry, AdsVersion, AmsAddr, AmsNetId, DeviceInfo, DeviceState, NotificationAttrib,
    ADSIGRP_DEVICE_DATA, ADSIGRP_SYM_HNDBYNAME, ADSIGRP_SYM_INFOBYNAMEEX, ADSIGRP_SYM_RELEASEHND,
    ADSIGRP_SYM_VALBYHND, ADSIGRP_SYM_VERSION
};
use super::transport::AdsTransport;


/// Index group symbols are allocated in.
pub const SIM_DATA_GROUP : u32 = 0x4040;

const FIRST_LOCAL_PORT : u16 = 30000;


#[derive(Debug, Clone)]
struct SimSymbol {
    group : u32,
    offset : u32,
    size : u32,
    type_id : AdsDataTypeId,
    type_name : String
}


struct SimPort {
    reachable : bool,
    ads_state : AdsState,
    device_info : DeviceInfo,
    symbols : HashMap<String, SimSymbol>,
    /// Process image per index group.
    memory : HashMap<u32, Vec<u8>>,
    handles : HashMap<u32, String>,
    next_handle : u32,
    next_offset : u32,
    symbol_version : u8,
    failing : HashSet<String>
}

impl SimPort {

    fn new(ads_port : u16) -> Self {
        Self {
            reachable : true,
            ads_state : AdsState::Run,
            device_info : DeviceInfo {
                name : format!("Simulated PLC {}", ads_port),
                version : AdsVersion { version : 3, revision : 1, build : 4024 }
            },
            symbols : HashMap::new(),
            memory : HashMap::new(),
            handles : HashMap::new(),
            next_handle : 1,
            next_offset : 0,
            symbol_version : 1,
            failing : HashSet::new()
        }
    }

    fn read_memory(&mut self, group : u32, offset : u32, len : usize) -> Vec<u8> {
        let area = self.memory.entry(group).or_default();
        let start = offset as usize;
        if area.len() < start + len {
            area.resize(start + len, 0);
        }
        area[start .. start + len].to_vec()
    }

    fn write_memory(&mut self, group : u32, offset : u32, data : &[u8]) {
        let area = self.memory.entry(group).or_default();
        let start = offset as usize;
        if area.len() < start + data.len() {
            area.resize(start + data.len(), 0);
        }
        area[start .. start + data.len()].copy_from_slice(data);
    }

    fn allocate(&mut self, size : u32) -> u32 {
        let offset = self.next_offset;
        // Keep symbols 8-byte aligned.
        self.next_offset += (size + 7) & !7;
        offset
    }

    fn symbol_by_handle(&self, handle : u32) -> Result<SimSymbol, AdsError> {
        self.handles.get(&handle)
            .and_then(|name| self.symbols.get(name))
            .cloned()
            .ok_or(AdsError::new(ADSERR_DEVICE_INVALIDOFFSET))
    }
}


#[derive(Debug, Clone)]
struct SimNotification {
    local_port : u16,
    target : AmsAddr,
    group : u32,
    offset : u32,
    length : u32,
    last : Vec<u8>
}


/// Number of calls made to selected services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub open_port : u32,
    pub close_port : u32,
    pub add_route : u32,
    pub add_device_notification : u32,
    pub del_device_notification : u32,
    pub read_state : u32
}


#[derive(Default)]
struct CallCounters {
    open_port : AtomicU32,
    close_port : AtomicU32,
    add_route : AtomicU32,
    add_device_notification : AtomicU32,
    del_device_notification : AtomicU32,
    read_state : AtomicU32
}


struct SimState {
    ports : HashMap<u16, SimPort>,
    local_ports : HashSet<u16>,
    next_local_port : u16,
    routes : HashMap<AmsNetId, String>,
    producers : HashMap<AmsAddr, NotificationProducer>,
    notifications : HashMap<u32, SimNotification>,
    next_notification : u32,
    fixed_timestamp : Option<u64>
}

impl SimState {

    fn timestamp(&self) -> u64 {
        self.fixed_timestamp.unwrap_or_else(|| system_time_to_filetime(SystemTime::now()))
    }

    /// Check the local port and the target, returning the addressed port.
    fn port_for(&mut self, local_port : u16, net_id : AmsNetId, target : &AmsAddr) -> Result<&mut SimPort, AdsError> {
        if !self.local_ports.contains(&local_port) {
            return Err(AdsError::new(ADSERR_CLIENT_PORTNOTOPEN));
        }
        if target.net_id != net_id {
            return Err(AdsError::new(GLOBALERR_MISSING_ROUTE));
        }

        let port = self.ports.get_mut(&target.port).ok_or(AdsError::new(GLOBALERR_TARGET_PORT))?;
        if !port.reachable {
            return Err(AdsError::new(ADSERR_CLIENT_SYNCTIMEOUT));
        }
        return Ok(port);
    }

    /// Build the streams for every notification on `ads_port` whose watched
    /// bytes changed, or for `only` regardless of change.
    fn collect_changes(&mut self, net_id : AmsNetId, ads_port : u16, only : Option<u32>) -> Vec<(AmsAddr, Vec<u8>)> {
        let timestamp = self.timestamp();
        let target = AmsAddr::new(net_id, ads_port);

        let port = match self.ports.get_mut(&ads_port) {
            Some(port) if port.reachable => port,
            _ => return Vec::new(),
        };

        let mut handles : Vec<u32> = self.notifications.iter()
            .filter(|(_, n)| n.target == target)
            .map(|(h, _)| *h)
            .collect();
        handles.sort_unstable();

        let mut builder = NotificationStreamBuilder::new().stamp(timestamp);
        let mut any = false;

        for handle in handles {
            let forced = only == Some(handle);
            if only.is_some() && !forced {
                continue;
            }
            let Some(notification) = self.notifications.get_mut(&handle) else { continue };

            let current = if notification.group == ADSIGRP_SYM_VERSION {
                vec![port.symbol_version]
            }
            else {
                port.read_memory(notification.group, notification.offset, notification.length as usize)
            };

            if forced || current != notification.last {
                notification.last = current.clone();
                builder = builder.sample(handle, &current);
                any = true;
            }
        }

        if !any {
            return Vec::new();
        }
        return vec![(target, builder.build())];
    }
}


pub struct SimulatedTarget {
    net_id : AmsNetId,
    state : Mutex<SimState>,
    counters : CallCounters
}

impl SimulatedTarget {

    pub fn new(net_id : AmsNetId) -> Self {
        Self {
            net_id,
            state : Mutex::new(SimState {
                ports : HashMap::new(),
                local_ports : HashSet::new(),
                next_local_port : FIRST_LOCAL_PORT,
                routes : HashMap::new(),
                producers : HashMap::new(),
                notifications : HashMap::new(),
                next_notification : 1,
                fixed_timestamp : None
            }),
            counters : CallCounters::default()
        }
    }

    pub fn net_id(&self) -> AmsNetId {
        self.net_id
    }

    /// Add an ADS port (runtime), reachable and in Run.
    pub fn add_port(&self, ads_port : u16) {
        self.state.lock().ports.entry(ads_port).or_insert_with(|| SimPort::new(ads_port));
    }

    /// Declare a symbol. Its memory is zeroed. Returns (group, offset).
    pub fn add_symbol(&self, ads_port : u16, name : &str, type_id : AdsDataTypeId, size : u32) -> (u32, u32) {
        let mut state = self.state.lock();
        let port = state.ports.entry(ads_port).or_insert_with(|| SimPort::new(ads_port));

        let offset = port.allocate(size);
        port.write_memory(SIM_DATA_GROUP, offset, &vec![0u8; size as usize]);
        port.symbols.insert(name.to_string(), SimSymbol {
            group : SIM_DATA_GROUP,
            offset,
            size,
            type_id,
            type_name : format!("{:?}", type_id)
        });
        (SIM_DATA_GROUP, offset)
    }

    /// Change a symbol's size. The symbol moves to fresh, zeroed memory, the
    /// way a program download relocates variables.
    pub fn resize_symbol(&self, ads_port : u16, name : &str, size : u32) -> bool {
        let mut state = self.state.lock();
        let Some(port) = state.ports.get_mut(&ads_port) else { return false };
        if !port.symbols.contains_key(name) {
            return false;
        }

        let offset = port.allocate(size);
        port.write_memory(SIM_DATA_GROUP, offset, &vec![0u8; size as usize]);
        if let Some(symbol) = port.symbols.get_mut(name) {
            symbol.offset = offset;
            symbol.size = size;
        }
        true
    }

    /// Bump the symbol version, as after an online change or program
    /// download. All symbol handles become invalid.
    pub fn reload_symbols(&self, ads_port : u16) {
        let streams = {
            let mut state = self.state.lock();
            let Some(port) = state.ports.get_mut(&ads_port) else { return };
            port.symbol_version = port.symbol_version.wrapping_add(1);
            port.handles.clear();
            state.collect_changes(self.net_id, ads_port, None)
        };
        self.push_streams(streams);
    }

    pub fn symbol_version(&self, ads_port : u16) -> Option<u8> {
        self.state.lock().ports.get(&ads_port).map(|p| p.symbol_version)
    }

    /// Set the raw bytes of a symbol, notifying subscribers on change.
    pub fn set_symbol_value(&self, ads_port : u16, name : &str, data : &[u8]) -> bool {
        let streams = {
            let mut state = self.state.lock();
            let Some(port) = state.ports.get_mut(&ads_port) else { return false };
            let Some(symbol) = port.symbols.get(name).cloned() else { return false };

            let len = data.len().min(symbol.size as usize);
            port.write_memory(symbol.group, symbol.offset, &data[..len]);
            state.collect_changes(self.net_id, ads_port, None)
        };
        self.push_streams(streams);
        true
    }

    pub fn symbol_value(&self, ads_port : u16, name : &str) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let port = state.ports.get_mut(&ads_port)?;
        let symbol = port.symbols.get(name).cloned()?;
        Some(port.read_memory(symbol.group, symbol.offset, symbol.size as usize))
    }

    pub fn write_memory(&self, ads_port : u16, group : u32, offset : u32, data : &[u8]) {
        let streams = {
            let mut state = self.state.lock();
            let Some(port) = state.ports.get_mut(&ads_port) else { return };
            port.write_memory(group, offset, data);
            state.collect_changes(self.net_id, ads_port, None)
        };
        self.push_streams(streams);
    }

    pub fn read_memory(&self, ads_port : u16, group : u32, offset : u32, len : usize) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let port = state.ports.get_mut(&ads_port)?;
        Some(port.read_memory(group, offset, len))
    }

    /// Make a port reachable or not. Unreachable ports time out every
    /// request and produce no notifications.
    pub fn set_reachable(&self, ads_port : u16, reachable : bool) {
        let mut state = self.state.lock();
        if let Some(port) = state.ports.get_mut(&ads_port) {
            port.reachable = reachable;
        }
    }

    pub fn set_ads_state(&self, ads_port : u16, ads_state : AdsState) {
        let mut state = self.state.lock();
        if let Some(port) = state.ports.get_mut(&ads_port) {
            port.ads_state = ads_state;
        }
    }

    /// Make lookups of a symbol fail with "symbol not found".
    pub fn fail_symbol(&self, ads_port : u16, name : &str, fail : bool) {
        let mut state = self.state.lock();
        if let Some(port) = state.ports.get_mut(&ads_port) {
            if fail {
                port.failing.insert(name.to_string());
            }
            else {
                port.failing.remove(name);
            }
        }
    }

    /// Use a fixed timestamp for produced samples instead of the clock.
    pub fn set_fixed_timestamp(&self, filetime : Option<u64>) {
        self.state.lock().fixed_timestamp = filetime;
    }

    /// Push an arbitrary stream to the dispatcher attached for `target`.
    pub fn push_raw_stream(&self, target : &AmsAddr, stream : &[u8]) -> Result<(), RingError> {
        let producer = self.state.lock().producers.get(target).cloned();
        match producer {
            Some(producer) => producer.push(stream),
            None => Err(RingError::Closed),
        }
    }

    pub fn counters(&self) -> SimCounters {
        SimCounters {
            open_port : self.counters.open_port.load(Ordering::SeqCst),
            close_port : self.counters.close_port.load(Ordering::SeqCst),
            add_route : self.counters.add_route.load(Ordering::SeqCst),
            add_device_notification : self.counters.add_device_notification.load(Ordering::SeqCst),
            del_device_notification : self.counters.del_device_notification.load(Ordering::SeqCst),
            read_state : self.counters.read_state.load(Ordering::SeqCst)
        }
    }

    /// Number of device notifications currently registered.
    pub fn active_notifications(&self) -> usize {
        self.state.lock().notifications.len()
    }

    /// Number of symbol handles currently held on a port.
    pub fn active_handles(&self, ads_port : u16) -> usize {
        self.state.lock().ports.get(&ads_port).map(|p| p.handles.len()).unwrap_or(0)
    }

    pub fn has_route(&self, net_id : &AmsNetId) -> bool {
        self.state.lock().routes.contains_key(net_id)
    }

    fn push_streams(&self, streams : Vec<(AmsAddr, Vec<u8>)>) {
        for (target, stream) in streams {
            let producer = self.state.lock().producers.get(&target).cloned();
            if let Some(producer) = producer {
                // Full or closed rings drop the stream, as the router does.
                let _ = producer.push(&stream);
            }
        }
    }

    fn symbol_info_response(name : &str, symbol : &SimSymbol) -> Vec<u8> {
        let entry = AdsSymbolEntry {
            entry_length : (AdsSymbolEntry::HEADER_LEN + name.len() + symbol.type_name.len() + 3) as u32,
            group : symbol.group,
            offset : symbol.offset,
            size : symbol.size,
            data_type : symbol.type_id as u32,
            flags : 0,
            name_length : name.len() as u16,
            type_length : symbol.type_name.len() as u16,
            comment_length : 0
        };

        let mut out = entry.as_bytes().to_vec();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(symbol.type_name.as_bytes());
        out.push(0);
        out.push(0);
        out
    }
}


fn symbol_name_from(write_data : &[u8]) -> String {
    let end = write_data.iter().position(|&c| c == 0).unwrap_or(write_data.len());
    String::from_utf8_lossy(&write_data[..end]).into_owned()
}


impl AdsTransport for SimulatedTarget {

    fn add_route(&self, net_id : &AmsNetId, host : &str) -> Result<(), AdsError> {
        self.counters.add_route.fetch_add(1, Ordering::SeqCst);
        self.state.lock().routes.insert(*net_id, host.to_string());
        Ok(())
    }

    fn del_route(&self, net_id : &AmsNetId) -> Result<(), AdsError> {
        match self.state.lock().routes.remove(net_id) {
            Some(_) => Ok(()),
            None => Err(AdsError::new(GLOBALERR_MISSING_ROUTE)),
        }
    }

    fn open_port(&self) -> Result<u16, AdsError> {
        self.counters.open_port.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let port = state.next_local_port;
        state.next_local_port = state.next_local_port.wrapping_add(1).max(FIRST_LOCAL_PORT);
        state.local_ports.insert(port);
        Ok(port)
    }

    fn close_port(&self, port : u16) -> Result<(), AdsError> {
        self.counters.close_port.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if !state.local_ports.remove(&port) {
            return Err(AdsError::new(ADSERR_CLIENT_PORTNOTOPEN));
        }
        state.notifications.retain(|_, n| n.local_port != port);
        Ok(())
    }

    fn set_timeout(&self, port : u16, _timeout : Duration) -> Result<(), AdsError> {
        if self.state.lock().local_ports.contains(&port) {
            Ok(())
        }
        else {
            Err(AdsError::new(ADSERR_CLIENT_PORTNOTOPEN))
        }
    }

    fn read_state(&self, port : u16, target : &AmsAddr) -> Result<DeviceState, AdsError> {
        self.counters.read_state.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let sim_port = state.port_for(port, self.net_id, target)?;
        Ok(DeviceState { ads_state : sim_port.ads_state, device_state : 0 })
    }

    fn read_device_info(&self, port : u16, target : &AmsAddr) -> Result<DeviceInfo, AdsError> {
        let mut state = self.state.lock();
        let sim_port = state.port_for(port, self.net_id, target)?;
        Ok(sim_port.device_info.clone())
    }

    fn read(&self, port : u16, target : &AmsAddr, group : u32, offset : u32, data : &mut [u8]) -> Result<u32, AdsError> {
        let mut state = self.state.lock();
        let sim_port = state.port_for(port, self.net_id, target)?;

        let bytes = match group {
            ADSIGRP_SYM_VALBYHND => {
                let symbol = sim_port.symbol_by_handle(offset)?;
                if data.len() > symbol.size as usize {
                    return Err(AdsError::new(ADSERR_DEVICE_INVALIDSIZE));
                }
                sim_port.read_memory(symbol.group, symbol.offset, data.len())
            },
            ADSIGRP_SYM_VERSION => vec![sim_port.symbol_version],
            ADSIGRP_DEVICE_DATA => (sim_port.ads_state as u16).to_le_bytes().to_vec(),
            _ => sim_port.read_memory(group, offset, data.len()),
        };

        let n = bytes.len().min(data.len());
        data[..n].copy_from_slice(&bytes[..n]);
        Ok(n as u32)
    }

    fn write(&self, port : u16, target : &AmsAddr, group : u32, offset : u32, data : &[u8]) -> Result<(), AdsError> {
        let streams = {
            let mut state = self.state.lock();
            let sim_port = state.port_for(port, self.net_id, target)?;

            match group {
                ADSIGRP_SYM_RELEASEHND => {
                    let raw : [u8; 4] = data.try_into().map_err(|_| AdsError::new(ADSERR_DEVICE_INVALIDSIZE))?;
                    if sim_port.handles.remove(&u32::from_le_bytes(raw)).is_none() {
                        return Err(AdsError::new(ADSERR_DEVICE_INVALIDOFFSET));
                    }
                    return Ok(());
                },
                ADSIGRP_SYM_VALBYHND => {
                    let symbol = sim_port.symbol_by_handle(offset)?;
                    if data.len() > symbol.size as usize {
                        return Err(AdsError::new(ADSERR_DEVICE_INVALIDSIZE));
                    }
                    sim_port.write_memory(symbol.group, symbol.offset, data);
                },
                ADSIGRP_SYM_VERSION | ADSIGRP_DEVICE_DATA | ADSIGRP_SYM_HNDBYNAME | ADSIGRP_SYM_INFOBYNAMEEX => {
                    return Err(AdsError::new(ADSERR_DEVICE_INVALIDGRP));
                },
                _ => sim_port.write_memory(group, offset, data),
            }

            state.collect_changes(self.net_id, target.port, None)
        };

        self.push_streams(streams);
        Ok(())
    }

    fn read_write(
        &self,
        port : u16,
        target : &AmsAddr,
        group : u32,
        _offset : u32,
        read_data : &mut [u8],
        write_data : &[u8]
    ) -> Result<u32, AdsError> {
        let mut state = self.state.lock();
        let sim_port = state.port_for(port, self.net_id, target)?;
        let name = symbol_name_from(write_data);

        if sim_port.failing.contains(&name) {
            return Err(AdsError::new(ADSERR_DEVICE_SYMBOLNOTFOUND));
        }
        let symbol = sim_port.symbols.get(&name).cloned().ok_or(AdsError::new(ADSERR_DEVICE_SYMBOLNOTFOUND))?;

        let response = match group {
            ADSIGRP_SYM_HNDBYNAME => {
                let handle = sim_port.next_handle;
                sim_port.next_handle += 1;
                sim_port.handles.insert(handle, name);
                handle.to_le_bytes().to_vec()
            },
            ADSIGRP_SYM_INFOBYNAMEEX => Self::symbol_info_response(&name, &symbol),
            _ => return Err(AdsError::new(ADSERR_DEVICE_INVALIDGRP)),
        };

        if response.len() > read_data.len() {
            return Err(AdsError::new(ADSERR_DEVICE_INVALIDSIZE));
        }
        read_data[..response.len()].copy_from_slice(&response);
        Ok(response.len() as u32)
    }

    fn add_device_notification(
        &self,
        port : u16,
        target : &AmsAddr,
        group : u32,
        offset : u32,
        attrib : &NotificationAttrib
    ) -> Result<u32, AdsError> {
        self.counters.add_device_notification.fetch_add(1, Ordering::SeqCst);

        let streams = {
            let mut state = self.state.lock();
            state.port_for(port, self.net_id, target)?;

            let handle = state.next_notification;
            state.next_notification += 1;
            state.notifications.insert(handle, SimNotification {
                local_port : port,
                target : *target,
                group,
                offset,
                length : attrib.length,
                last : Vec::new()
            });

            // The router sends the current value right after registration.
            let streams = state.collect_changes(self.net_id, target.port, Some(handle));
            (handle, streams)
        };

        let (handle, streams) = streams;
        self.push_streams(streams);
        Ok(handle)
    }

    fn del_device_notification(&self, port : u16, target : &AmsAddr, handle : u32) -> Result<(), AdsError> {
        self.counters.del_device_notification.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.port_for(port, self.net_id, target)?;

        match state.notifications.get(&handle) {
            Some(n) if n.target == *target && n.local_port == port => {
                state.notifications.remove(&handle);
                Ok(())
            },
            _ => Err(AdsError::new(ADSERR_DEVICE_NOTIFYHNDINVALID)),
        }
    }

    fn attach_notification_stream(&self, target : &AmsAddr, producer : NotificationProducer) {
        self.state.lock().producers.insert(*target, producer);
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> (SimulatedTarget, u16, AmsAddr) {
        let net_id = AmsNetId::new([10, 0, 0, 1, 1, 1]);
        let sim = SimulatedTarget::new(net_id);
        sim.add_port(851);
        let port = sim.open_port().unwrap();
        (sim, port, AmsAddr::new(net_id, 851))
    }

    #[test]
    fn handle_round_trip() {
        let (sim, port, addr) = target();
        sim.add_symbol(851, "MAIN.nValue", AdsDataTypeId::Int32, 4);
        sim.set_symbol_value(851, "MAIN.nValue", &42i32.to_le_bytes());

        let mut raw = [0u8; 4];
        sim.read_write(port, &addr, ADSIGRP_SYM_HNDBYNAME, 0, &mut raw, b"MAIN.nValue").unwrap();
        let handle = u32::from_le_bytes(raw);

        let mut value = [0u8; 4];
        sim.read(port, &addr, ADSIGRP_SYM_VALBYHND, handle, &mut value).unwrap();
        assert_eq!(i32::from_le_bytes(value), 42);

        sim.write(port, &addr, ADSIGRP_SYM_RELEASEHND, 0, &handle.to_le_bytes()).unwrap();
        assert_eq!(sim.active_handles(851), 0);
        assert!(sim.read(port, &addr, ADSIGRP_SYM_VALBYHND, handle, &mut value).is_err());
    }

    #[test]
    fn unreachable_port_times_out() {
        let (sim, port, addr) = target();
        sim.set_reachable(851, false);
        let err = sim.read_state(port, &addr).unwrap_err();
        assert_eq!(err.code, ADSERR_CLIENT_SYNCTIMEOUT);
    }

    #[test]
    fn close_port_drops_its_notifications() {
        let (sim, port, addr) = target();
        let attrib = NotificationAttrib::on_change(4, 10.0, 10.0);
        sim.add_device_notification(port, &addr, SIM_DATA_GROUP, 0, &attrib).unwrap();
        assert_eq!(sim.active_notifications(), 1);

        sim.close_port(port).unwrap();
        assert_eq!(sim.active_notifications(), 0);
    }

    #[test]
    fn failing_symbol_not_found() {
        let (sim, port, addr) = target();
        sim.add_symbol(851, "MAIN.x", AdsDataTypeId::Real64, 8);
        sim.fail_symbol(851, "MAIN.x", true);

        let mut raw = [0u8; 4];
        let err = sim.read_write(port, &addr, ADSIGRP_SYM_HNDBYNAME, 0, &mut raw, b"MAIN.x").unwrap_err();
        assert_eq!(err.code, ADSERR_DEVICE_SYMBOLNOTFOUND);
    }
}
