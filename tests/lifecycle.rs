//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use adsparams_rs::client::client_types::ADSIGRP_SYM_VALBYHND;
use adsparams_rs::client::{
    AdsDataTypeId, AdsTransport, AmsAddr, AmsNetId, DeviceInfo, DeviceState, NotificationAttrib, SimulatedTarget
};
use adsparams_rs::error::AdsError;
use adsparams_rs::notification::NotificationProducer;
use adsparams_rs::AdsParamDriver;
use adsparams_rs::notification::{filetime_to_system_time, system_time_to_filetime};
use adsparams_rs::{AlarmStatus, ParamError, ParamType, ParamValue};

use common::*;


/// Changes a symbol right after the first read by handle, then holds the
/// reading thread while the change is delivered.
struct ChangeAfterFirstRead {
    sim : Arc<SimulatedTarget>,
    symbol : &'static str,
    value : Vec<u8>,
    fired : AtomicBool
}

impl ChangeAfterFirstRead {
    fn inner(&self) -> &dyn AdsTransport {
        &*self.sim
    }
}

impl AdsTransport for ChangeAfterFirstRead {
    fn add_route(&self, net_id : &AmsNetId, host : &str) -> Result<(), AdsError> {
        self.inner().add_route(net_id, host)
    }

    fn del_route(&self, net_id : &AmsNetId) -> Result<(), AdsError> {
        self.inner().del_route(net_id)
    }

    fn open_port(&self) -> Result<u16, AdsError> {
        self.inner().open_port()
    }

    fn close_port(&self, port : u16) -> Result<(), AdsError> {
        self.inner().close_port(port)
    }

    fn set_timeout(&self, port : u16, timeout : Duration) -> Result<(), AdsError> {
        self.inner().set_timeout(port, timeout)
    }

    fn read_state(&self, port : u16, target : &AmsAddr) -> Result<DeviceState, AdsError> {
        self.inner().read_state(port, target)
    }

    fn read_device_info(&self, port : u16, target : &AmsAddr) -> Result<DeviceInfo, AdsError> {
        self.inner().read_device_info(port, target)
    }

    fn read(&self, port : u16, target : &AmsAddr, group : u32, offset : u32, data : &mut [u8]) -> Result<u32, AdsError> {
        let read = self.inner().read(port, target, group, offset, data)?;
        if group == ADSIGRP_SYM_VALBYHND && !self.fired.swap(true, Ordering::SeqCst) {
            self.sim.set_symbol_value(target.port, self.symbol, &self.value);
            thread::sleep(Duration::from_millis(200));
        }
        Ok(read)
    }

    fn write(&self, port : u16, target : &AmsAddr, group : u32, offset : u32, data : &[u8]) -> Result<(), AdsError> {
        self.inner().write(port, target, group, offset, data)
    }

    fn read_write(
        &self,
        port : u16,
        target : &AmsAddr,
        group : u32,
        offset : u32,
        read_data : &mut [u8],
        write_data : &[u8]
    ) -> Result<u32, AdsError> {
        self.inner().read_write(port, target, group, offset, read_data, write_data)
    }

    fn add_device_notification(
        &self,
        port : u16,
        target : &AmsAddr,
        group : u32,
        offset : u32,
        attrib : &NotificationAttrib
    ) -> Result<u32, AdsError> {
        self.inner().add_device_notification(port, target, group, offset, attrib)
    }

    fn del_device_notification(&self, port : u16, target : &AmsAddr, handle : u32) -> Result<(), AdsError> {
        self.inner().del_device_notification(port, target, handle)
    }

    fn attach_notification_stream(&self, target : &AmsAddr, producer : NotificationProducer) {
        self.inner().attach_notification_stream(target, producer)
    }
}


#[test]
fn refresh_is_idempotent() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nA", AdsDataTypeId::Int32, 4);
    sim.add_symbol(PLC_PORT, "MAIN.nB", AdsDataTypeId::Int16, 2);

    let a = driver.create_param("MAIN.nA?", ParamType::Int32).unwrap();
    let b = driver.create_param("MAIN.nB=", ParamType::Int32).unwrap();

    assert_eq!(driver.refresh(), 2);
    let added = sim.counters().add_device_notification;
    let handles = sim.active_handles(PLC_PORT);

    assert_eq!(driver.refresh(), 0);
    assert_eq!(sim.counters().add_device_notification, added);
    assert_eq!(sim.active_handles(PLC_PORT), handles);

    assert!(driver.param(a).unwrap().is_subscribed());
    assert!(!driver.param(b).unwrap().is_subscribed());
    assert!(!driver.param(b).unwrap().refresh_needed);
}

#[test]
fn changes_arrive_through_notifications() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nCount", AdsDataTypeId::Int32, 4);
    let index = driver.create_param("MAIN.nCount?", ParamType::Int32).unwrap();
    driver.refresh();
    assert_eq!(driver.read_int32(index).unwrap(), 0);

    sim.set_symbol_value(PLC_PORT, "MAIN.nCount", &1234i32.to_le_bytes());
    assert!(wait_until(TIMEOUT, || driver.read_int32(index).ok() == Some(1234)));
}

#[test]
fn invalidate_then_refresh_replaces_handles() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.fTemp", AdsDataTypeId::Real64, 8);
    let index = driver.create_param("MAIN.fTemp?", ParamType::Float64).unwrap();
    driver.refresh();

    let before = driver.param(index).unwrap();
    let active = sim.active_notifications();

    assert_eq!(driver.invalidate(Some(PLC_PORT)), 1);
    let pending = driver.param(index).unwrap();
    assert!(pending.refresh_needed);
    assert!(!pending.is_subscribed());
    assert_eq!(pending.stale_notifications, vec![before.notification.unwrap()]);

    driver.refresh();
    let after = driver.param(index).unwrap();
    assert!(!after.refresh_needed);
    assert!(after.stale_notifications.is_empty());
    assert_ne!(after.notification, before.notification);
    assert_eq!(sim.active_notifications(), active);
}

#[test]
fn array_resize_gives_zeroed_buffer() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.aData", AdsDataTypeId::Real32, 16);
    let values : Vec<u8> = [1.0f32, 2.0, 3.0, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    sim.set_symbol_value(PLC_PORT, "MAIN.aData", &values);

    let index = driver.create_param("MAIN.aData?", ParamType::Float32Array).unwrap();
    driver.refresh();
    assert_eq!(driver.read_array(index).unwrap(), ParamValue::Float32Array(vec![1.0, 2.0, 3.0, 4.0]));

    sim.resize_symbol(PLC_PORT, "MAIN.aData", 32);
    driver.invalidate(Some(PLC_PORT));
    assert_eq!(driver.refresh(), 1);

    let param = driver.param(index).unwrap();
    assert_eq!(param.plc_size, 32);
    assert_eq!(param.buffer, vec![0u8; 32]);
    assert_eq!(driver.read_array(index).unwrap(), ParamValue::Float32Array(vec![0.0; 8]));
}

#[test]
fn failed_lookup_is_retried() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.bFlag", AdsDataTypeId::Bit, 1);
    sim.fail_symbol(PLC_PORT, "MAIN.bFlag", true);

    let index = driver.create_param("MAIN.bFlag?", ParamType::Int32).unwrap();
    assert_eq!(driver.refresh(), 0);
    assert!(driver.param(index).unwrap().refresh_needed);
    assert!(matches!(driver.read_int32(index), Err(ParamError::NotResolved(_))));

    sim.fail_symbol(PLC_PORT, "MAIN.bFlag", false);
    assert_eq!(driver.refresh(), 1);
    assert_eq!(driver.read_int32(index).unwrap(), 0);
}

#[test]
fn symbol_reload_rebinds_parameters() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nCount", AdsDataTypeId::Int32, 4);
    let index = driver.create_param("MAIN.nCount?", ParamType::Int32).unwrap();
    driver.refresh();

    let version = driver.port_info(PLC_PORT).unwrap().symbol_version;
    assert_eq!(version, sim.symbol_version(PLC_PORT));
    let old = driver.param(index).unwrap().notification;

    // No refresh, tick or supervisor: the reload alone rebinds.
    sim.reload_symbols(PLC_PORT);
    assert!(wait_until(TIMEOUT, || {
        let param = driver.param(index).unwrap();
        !param.refresh_needed && param.is_subscribed() && param.notification != old
    }));
    assert_eq!(driver.port_info(PLC_PORT).unwrap().symbol_version, sim.symbol_version(PLC_PORT));
    assert!(!driver.is_host_ready());

    sim.set_symbol_value(PLC_PORT, "MAIN.nCount", &77i32.to_le_bytes());
    assert!(wait_until(TIMEOUT, || driver.read_int32(index).ok() == Some(77)));
}

#[test]
fn absolute_address_resolves_without_symbol() {
    let (sim, driver, _rx) = connected(config());
    sim.write_memory(PLC_PORT, 0x4020, 8, &(-5i16).to_le_bytes());

    let index = driver.create_param(".ADR.16#4020,16#8,2,2?", ParamType::Int32).unwrap();
    assert_eq!(driver.refresh(), 1);
    assert_eq!(driver.read_int32(index).unwrap(), -5);
    assert_eq!(sim.active_handles(PLC_PORT), 0);

    sim.write_memory(PLC_PORT, 0x4020, 8, &300i16.to_le_bytes());
    assert!(wait_until(TIMEOUT, || driver.read_int32(index).ok() == Some(300)));

    // Invalidation keeps an absolute address valid.
    driver.invalidate(Some(PLC_PORT));
    assert!(driver.param(index).unwrap().address_valid);
}

#[test]
fn plc_time_base_uses_notification_timestamp() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.fPos", AdsDataTypeId::Real64, 8);
    let index = driver.create_param("TIMEBASE=PLC/MAIN.fPos?", ParamType::Float64).unwrap();
    driver.refresh();

    let filetime = system_time_to_filetime(SystemTime::now() + Duration::from_secs(3600));
    sim.set_fixed_timestamp(Some(filetime));
    sim.set_symbol_value(PLC_PORT, "MAIN.fPos", &1.5f64.to_le_bytes());

    assert!(wait_until(TIMEOUT, || driver.read_float64(index).ok() == Some(1.5)));
    let param = driver.param(index).unwrap();
    assert_eq!(param.plc_timestamp, Some(filetime));
    assert_eq!(param.timestamp, Some(filetime_to_system_time(filetime)));
}

#[test]
fn array_type_mismatch_raises_alarm() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.aReal", AdsDataTypeId::Real32, 8);
    let index = driver.create_param("MAIN.aReal?", ParamType::Int16Array).unwrap();
    driver.refresh();

    let param = driver.param(index).unwrap();
    assert!(param.is_subscribed());
    assert_eq!(param.alarm.status, AlarmStatus::Read);
    assert!(matches!(driver.read_array(index), Err(ParamError::NotResolved(_))));
}

#[test]
fn change_during_resolve_is_not_lost() {
    let sim = simulated_plc();
    sim.add_symbol(PLC_PORT, "MAIN.nCount", AdsDataTypeId::Int32, 4);
    sim.set_symbol_value(PLC_PORT, "MAIN.nCount", &1i32.to_le_bytes());

    let transport = Arc::new(ChangeAfterFirstRead {
        sim : sim.clone(),
        symbol : "MAIN.nCount",
        value : 99i32.to_le_bytes().to_vec(),
        fired : AtomicBool::new(false)
    });
    let (driver, _rx) = AdsParamDriver::new(config(), transport).unwrap();
    driver.connect().unwrap();

    let index = driver.create_param("MAIN.nCount?", ParamType::Int32).unwrap();
    assert_eq!(driver.refresh(), 1);

    let param = driver.param(index).unwrap();
    assert!(param.is_subscribed());
    assert!(param.pending_notification.is_none());
    assert_eq!(sim.symbol_value(PLC_PORT, "MAIN.nCount").unwrap(), 99i32.to_le_bytes().to_vec());
    assert_eq!(driver.read_int32(index).unwrap(), 99);
}

#[test]
fn array_symbol_in_scalar_slot_keeps_plc_sized_buffer() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.aReal", AdsDataTypeId::Real32, 8);
    let index = driver.create_param("MAIN.aReal?", ParamType::Float64).unwrap();
    driver.refresh();

    let param = driver.param(index).unwrap();
    assert!(param.plc_is_array);
    assert_eq!(param.buffer.len(), 8);
    assert_eq!(param.alarm.status, AlarmStatus::Read);
}
