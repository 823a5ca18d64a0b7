//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

mod common;

use std::collections::HashSet;

use adsparams_rs::client::{AdsDataTypeId, AdsState};
use adsparams_rs::{AlarmSeverity, AlarmStatus, ParamType, ParamValue};

use common::*;


#[test]
fn reconnect_converges() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nIn", AdsDataTypeId::Int32, 4);
    sim.add_symbol(PLC_PORT, "MAIN.nOut", AdsDataTypeId::Int32, 4);

    let input = driver.create_param("MAIN.nIn?", ParamType::Int32).unwrap();
    let output = driver.create_param("MAIN.nOut=", ParamType::Int32).unwrap();
    let state = driver.create_param(".AMSPORTSTATE.?", ParamType::Int32).unwrap();

    driver.set_host_ready();
    driver.tick();
    assert!(!driver.param(input).unwrap().refresh_needed);
    assert_eq!(driver.read_int32(state).unwrap(), AdsState::Run as i32);
    assert!(driver.port_info(PLC_PORT).unwrap().device_info.is_some());
    assert_eq!(sim.counters().open_port, 1);

    sim.set_reachable(PLC_PORT, false);
    for _ in 0..6 {
        driver.tick();
    }

    let lost = driver.param(input).unwrap();
    assert!(lost.refresh_needed);
    assert_eq!(lost.alarm.status, AlarmStatus::Comm);
    assert_eq!(lost.alarm.severity, AlarmSeverity::Invalid);
    assert_eq!(driver.read_int32(state).unwrap(), 0);
    assert!(!driver.port_info(PLC_PORT).unwrap().reachable);

    let counters = sim.counters();
    assert_eq!(counters.close_port, 1);
    assert_eq!(counters.open_port, 2);

    sim.set_reachable(PLC_PORT, true);
    driver.tick();

    for index in [input, output] {
        let param = driver.param(index).unwrap();
        assert!(!param.refresh_needed, "{} still needs refresh", param.drv_info);
        assert!(!param.alarm.is_active());
    }
    assert!(driver.param(input).unwrap().is_subscribed());
    assert_eq!(driver.read_int32(state).unwrap(), AdsState::Run as i32);

    let port = driver.port_info(PLC_PORT).unwrap();
    assert!(port.reachable && port.params_ok);
    assert!(!port.refresh_needed);

    driver.tick();
    let counters = sim.counters();
    assert_eq!(counters.close_port, 1);
    assert_eq!(counters.open_port, 2);

    sim.set_symbol_value(PLC_PORT, "MAIN.nIn", &5i32.to_le_bytes());
    assert!(wait_until(TIMEOUT, || driver.read_int32(input).ok() == Some(5)));
}

#[test]
fn ticks_without_params_keep_connection_open() {
    let (sim, driver, _rx) = connected(config());
    driver.set_host_ready();
    for _ in 0..5 {
        driver.tick();
    }

    let counters = sim.counters();
    assert_eq!(counters.close_port, 0);
    assert_eq!(counters.open_port, 1);
    assert!(driver.connection().is_open());

    sim.add_symbol(PLC_PORT, "MAIN.nIn", AdsDataTypeId::Int32, 4);
    let input = driver.create_param("MAIN.nIn?", ParamType::Int32).unwrap();
    driver.tick();
    assert!(driver.param(input).unwrap().is_subscribed());
    assert_eq!(sim.counters().close_port, 0);
}

#[test]
fn reload_before_host_ready_rebinds() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nCount", AdsDataTypeId::Int32, 4);
    let index = driver.create_param("MAIN.nCount?", ParamType::Int32).unwrap();
    assert_eq!(driver.refresh(), 1);
    driver.start_supervisor().unwrap();
    let old = driver.param(index).unwrap().notification;

    sim.reload_symbols(PLC_PORT);
    assert!(wait_until(TIMEOUT, || {
        let param = driver.param(index).unwrap();
        !param.refresh_needed && param.is_subscribed() && param.notification != old
    }));
    assert!(!driver.is_host_ready());

    sim.set_symbol_value(PLC_PORT, "MAIN.nCount", &8i32.to_le_bytes());
    assert!(wait_until(TIMEOUT, || driver.read_int32(index).ok() == Some(8)));
}

#[test]
fn plc_stop_invalidates_without_comm_alarm() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nIn", AdsDataTypeId::Int32, 4);
    let input = driver.create_param("MAIN.nIn?", ParamType::Int32).unwrap();

    driver.set_host_ready();
    driver.tick();
    assert!(driver.param(input).unwrap().is_subscribed());

    sim.set_ads_state(PLC_PORT, AdsState::Stop);
    driver.tick();
    let stopped = driver.param(input).unwrap();
    assert!(stopped.refresh_needed);
    assert_ne!(stopped.alarm.status, AlarmStatus::Comm);
    assert!(!driver.port_info(PLC_PORT).unwrap().params_ok);

    // Nothing is resolved while stopped.
    driver.tick();
    assert!(driver.param(input).unwrap().refresh_needed);

    sim.set_ads_state(PLC_PORT, AdsState::Run);
    driver.tick();
    assert!(!driver.param(input).unwrap().refresh_needed);
    assert_eq!(sim.counters().close_port, 0);
}

#[test]
fn catch_up_republishes_once() {
    let (sim, driver, mut rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nA", AdsDataTypeId::Int32, 4);
    sim.add_symbol(PLC_PORT, "MAIN.fB", AdsDataTypeId::Real64, 8);
    sim.set_symbol_value(PLC_PORT, "MAIN.nA", &3i32.to_le_bytes());

    let a = driver.create_param("MAIN.nA?", ParamType::Int32).unwrap();
    let b = driver.create_param("MAIN.fB?", ParamType::Float64).unwrap();
    driver.create_param("MAIN.missing?", ParamType::Int32).unwrap();

    assert_eq!(driver.refresh(), 2);
    assert!(drain(&mut rx).is_empty());

    // Ticks before the host is ready do nothing.
    driver.tick();
    assert!(drain(&mut rx).is_empty());

    driver.set_host_ready();
    driver.tick();
    let published = drain(&mut rx);
    let indices : HashSet<usize> = published.iter().map(|n| n.index).collect();
    assert_eq!(published.len(), 2);
    assert_eq!(indices, HashSet::from([a, b]));
    assert!(published.iter().any(|n| n.value == ParamValue::Int32(3)));

    driver.tick();
    assert!(drain(&mut rx).is_empty());

    sim.set_symbol_value(PLC_PORT, "MAIN.fB", &0.5f64.to_le_bytes());
    let update = wait_for(&mut rx, TIMEOUT, |n| n.index == b).unwrap();
    assert_eq!(update.value, ParamValue::Float64(0.5));
    assert_eq!(update.name, "MAIN.fB?");
}

#[test]
fn manual_disconnect_is_not_undone() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nIn", AdsDataTypeId::Int32, 4);
    let input = driver.create_param("MAIN.nIn?", ParamType::Int32).unwrap();
    driver.set_host_ready();
    driver.tick();

    driver.disconnect().unwrap();
    assert!(driver.param(input).unwrap().refresh_needed);
    assert_eq!(sim.active_notifications(), 0);

    for _ in 0..10 {
        driver.tick();
    }
    assert_eq!(sim.counters().open_port, 1);
    assert_eq!(driver.param(input).unwrap().alarm.status, AlarmStatus::Comm);

    driver.connect().unwrap();
    driver.tick();
    assert_eq!(sim.counters().open_port, 2);
    assert!(driver.param(input).unwrap().is_subscribed());
}

#[test]
fn supervisor_thread_resolves_and_follows_reloads() {
    let (sim, driver, mut rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nCount", AdsDataTypeId::Int32, 4);
    sim.set_symbol_value(PLC_PORT, "MAIN.nCount", &11i32.to_le_bytes());
    let index = driver.create_param("MAIN.nCount?", ParamType::Int32).unwrap();

    driver.set_host_ready();
    driver.start_supervisor().unwrap();
    driver.start_supervisor().unwrap();

    let first = wait_for(&mut rx, TIMEOUT, |n| n.index == index && n.value == ParamValue::Int32(11));
    assert!(first.is_some());
    let old = driver.param(index).unwrap().notification;
    assert!(old.is_some());

    sim.reload_symbols(PLC_PORT);
    assert!(wait_until(TIMEOUT, || {
        let param = driver.param(index).unwrap();
        param.is_subscribed() && param.notification != old
    }));

    sim.set_symbol_value(PLC_PORT, "MAIN.nCount", &12i32.to_le_bytes());
    assert!(wait_for(&mut rx, TIMEOUT, |n| n.index == index && n.value == ParamValue::Int32(12)).is_some());

    driver.shutdown();
    assert_eq!(sim.active_notifications(), 0);
}
