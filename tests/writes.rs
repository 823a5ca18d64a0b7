//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

mod common;

use adsparams_rs::client::AdsDataTypeId;
use adsparams_rs::param::StaticRecordDatabase;
use adsparams_rs::{AlarmStatus, ParamError, ParamType, ParamValue};

use common::*;


#[test]
fn scalar_writes_are_narrowed_to_plc_type() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nSpeed", AdsDataTypeId::Int16, 2);
    sim.add_symbol(PLC_PORT, "MAIN.fGain", AdsDataTypeId::Real32, 4);

    let speed = driver.create_param("MAIN.nSpeed=", ParamType::Int32).unwrap();
    let gain = driver.create_param("MAIN.fGain=", ParamType::Float64).unwrap();
    driver.refresh();

    driver.write_int32(speed, -1234).unwrap();
    driver.write_float64(gain, 0.25).unwrap();

    assert_eq!(sim.symbol_value(PLC_PORT, "MAIN.nSpeed").unwrap(), (-1234i16).to_le_bytes().to_vec());
    assert_eq!(sim.symbol_value(PLC_PORT, "MAIN.fGain").unwrap(), 0.25f32.to_le_bytes().to_vec());

    let param = driver.param(speed).unwrap();
    assert_eq!(param.value, ParamValue::Int32(-1234));
    assert!(!param.alarm.is_active());
}

#[test]
fn short_array_write_updates_prefix() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.aSteps", AdsDataTypeId::Int16, 8);
    let initial : Vec<u8> = [1i16, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
    sim.set_symbol_value(PLC_PORT, "MAIN.aSteps", &initial);

    let index = driver.create_param("MAIN.aSteps=", ParamType::Int16Array).unwrap();
    driver.refresh();

    driver.write_array(index, ParamValue::Int16Array(vec![10, 20])).unwrap();
    assert_eq!(driver.param(index).unwrap().value, ParamValue::Int16Array(vec![10, 20, 3, 4]));
    assert_eq!(driver.read_array(index).unwrap(), ParamValue::Int16Array(vec![10, 20, 3, 4]));
}

#[test]
fn oversized_array_write_raises_alarm() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.aSteps", AdsDataTypeId::Int16, 4);
    let index = driver.create_param("MAIN.aSteps=", ParamType::Int16Array).unwrap();
    driver.refresh();

    let result = driver.write_array(index, ParamValue::Int16Array(vec![1, 2, 3]));
    assert!(matches!(result, Err(ParamError::SizeMismatch { plc_size : 4, value_size : 6, .. })));
    assert_eq!(driver.param(index).unwrap().alarm.status, AlarmStatus::Write);
    assert_eq!(sim.symbol_value(PLC_PORT, "MAIN.aSteps").unwrap(), vec![0u8; 4]);
}

#[test]
fn wrong_slot_type_is_rejected_without_alarm() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.aSteps", AdsDataTypeId::Int16, 4);
    let index = driver.create_param("MAIN.aSteps=", ParamType::Int16Array).unwrap();
    driver.refresh();

    let result = driver.write_array(index, ParamValue::Float64Array(vec![1.0]));
    assert!(matches!(result, Err(ParamError::WrongType { .. })));
    assert!(matches!(driver.write_int32(index, 1), Err(ParamError::WrongType { .. })));
    assert!(matches!(driver.write_array(index, ParamValue::Int32(1)), Err(ParamError::WrongType { .. })));
    assert!(!driver.param(index).unwrap().alarm.is_active());
}

#[test]
fn unresolved_and_unknown_params() {
    let (_sim, driver, _rx) = connected(config());
    let index = driver.create_param("MAIN.nothing=", ParamType::Int32).unwrap();

    assert!(matches!(driver.write_int32(index, 1), Err(ParamError::NotResolved(_))));
    assert!(matches!(driver.write_int32(99, 1), Err(ParamError::NoSuchParam(99))));
    assert!(matches!(driver.read_int32(99), Err(ParamError::NoSuchParam(99))));
}

#[test]
fn failed_write_raises_alarm() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.nOut", AdsDataTypeId::Int32, 4);
    let index = driver.create_param("MAIN.nOut=", ParamType::Int32).unwrap();
    driver.refresh();

    sim.set_reachable(PLC_PORT, false);
    assert!(matches!(driver.write_int32(index, 3), Err(ParamError::Ads(_))));
    assert_eq!(driver.param(index).unwrap().alarm.status, AlarmStatus::Write);

    sim.set_reachable(PLC_PORT, true);
    driver.write_int32(index, 3).unwrap();
    assert!(!driver.param(index).unwrap().alarm.is_active());
}

#[test]
fn absolute_output_writes_memory() {
    let (sim, driver, _rx) = connected(config());
    let index = driver.create_param(".ADR.16#4020,16#10,8,5=", ParamType::Float64).unwrap();
    driver.refresh();

    driver.write_float64(index, -7.5).unwrap();
    assert_eq!(sim.read_memory(PLC_PORT, 0x4020, 0x10, 8).unwrap(), (-7.5f64).to_le_bytes().to_vec());
}

#[test]
fn records_bind_to_this_port_only() {
    let (sim, driver, _rx) = connected(config());
    sim.add_symbol(PLC_PORT, "MAIN.fSp", AdsDataTypeId::Real64, 8);

    let db = StaticRecordDatabase::new()
        .with_record("ao", "TEST:SP", &[("DTYP", "asynFloat64"), ("OUT", "@asyn(ADS_1,0,1)MAIN.fSp=")])
        .with_record("ao", "OTHER:SP", &[("DTYP", "asynFloat64"), ("OUT", "@asyn(ADS_2,0,1)MAIN.fSp=")])
        .with_record("ai", "TEST:SOFT", &[("DTYP", "Soft Channel"), ("INP", "TEST:SP")]);

    assert_eq!(driver.create_params_from_records(&db).unwrap(), 1);
    let index = driver.find_param("MAIN.fSp=").unwrap();
    assert_eq!(driver.param(index).unwrap().record_name.as_deref(), Some("TEST:SP"));

    driver.refresh();
    driver.write_float64(index, 9.0).unwrap();
    assert_eq!(sim.symbol_value(PLC_PORT, "MAIN.fSp").unwrap(), 9.0f64.to_le_bytes().to_vec());

    let bad = StaticRecordDatabase::new()
        .with_record("ai", "TEST:BAD", &[("DTYP", "asynInt32"), ("INP", "@asyn(ADS_1)MAIN.noDirection")]);
    assert!(driver.create_params_from_records(&bad).is_err());
}
