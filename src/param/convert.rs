//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Conversion between PLC bytes and host value slots, and the commit path
//! that stores a converted value, timestamps it and republishes it.

use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::client::ads_data::{decode_le_slice, encode_le_slice, AdsTypeInfo, Number};
use crate::error::ParamError;
use crate::notification::filetime_to_system_time;

use super::descriptor::{AdsParamInfo, Alarm, AlarmSeverity, AlarmStatus, ParamType, ParamValue};
use super::drv_info::TimeBase;


/// A committed value or alarm change, sent to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamNotification {
    pub index : usize,
    /// drvInfo key of the parameter.
    pub name : String,
    pub record : Option<String>,
    pub value : ParamValue,
    pub alarm : Alarm,
    pub timestamp : Option<SystemTime>
}

impl ParamNotification {

    pub fn from_param(param : &AdsParamInfo) -> Self {
        Self {
            index : param.index,
            name : param.drv_info.clone(),
            record : param.record_name.clone(),
            value : param.value.clone(),
            alarm : param.alarm,
            timestamp : param.timestamp
        }
    }
}


/// Sending side of the republish channel. Never blocks.
pub struct Republisher {
    tx : mpsc::Sender<ParamNotification>
}

impl Republisher {

    pub fn new(tx : mpsc::Sender<ParamNotification>) -> Self {
        Self { tx }
    }

    pub fn publish(&self, param : &AdsParamInfo) {
        let notification = ParamNotification::from_param(param);
        match self.tx.try_send(notification) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(n)) => {
                log::warn!("Republish channel full, dropping update of {}", n.name);
            },
            Err(mpsc::error::TrySendError::Closed(n)) => {
                log::trace!("Republish channel closed, dropping update of {}", n.name);
            }
        }
    }
}


fn type_info(param : &AdsParamInfo) -> Result<&'static AdsTypeInfo, ParamError> {
    let plc_type = param.plc_type.ok_or(ParamError::NotResolved(param.index))?;
    AdsTypeInfo::for_id(plc_type).ok_or_else(|| ParamError::Conversion {
        index : param.index,
        reason : format!("unsupported PLC type {:?}", plc_type)
    })
}

fn warn_width_once(param : &mut AdsParamInfo, info : &AdsTypeInfo) {
    if !param.width_warned && info.width != param.param_type.element_width() {
        log::warn!(
            "{}: PLC type {} ({} bytes) converted to {} ({} bytes)",
            param.address(), info.name, info.width, param.param_type, param.param_type.element_width()
        );
        param.width_warned = true;
    }
}

fn array_type_check(param : &AdsParamInfo, info : &AdsTypeInfo) -> Result<(), ParamError> {
    if !param.param_type.accepts_array_of(info.id) {
        return Err(ParamError::WrongType {
            index : param.index,
            actual : format!("{} array", info.name),
            requested : param.param_type.to_string()
        });
    }
    Ok(())
}


/// Convert raw PLC bytes into the parameter's slot type. Array data is kept
/// in the parameter's buffer.
pub fn decode_value(param : &mut AdsParamInfo, data : &[u8]) -> Result<ParamValue, ParamError> {
    let info = type_info(param)?;

    if data.len() != param.plc_size as usize {
        return Err(ParamError::SizeMismatch {
            index : param.index,
            plc_size : param.plc_size as usize,
            value_size : data.len()
        });
    }

    if !param.param_type.is_array() {
        if param.plc_is_array {
            return Err(ParamError::Conversion {
                index : param.index,
                reason : format!("{} array cannot be stored in a scalar {}", info.name, param.param_type)
            });
        }

        let number = info.decode_scalar(data).ok_or_else(|| ParamError::Conversion {
            index : param.index,
            reason : format!("cannot decode {} from {} bytes", info.name, data.len())
        })?;
        warn_width_once(param, info);

        return Ok(match param.param_type {
            ParamType::Int32 => ParamValue::Int32(number.as_i64() as i32),
            _ => ParamValue::Float64(number.as_f64()),
        });
    }

    array_type_check(param, info)?;

    param.resize_buffer(param.plc_size);
    param.buffer.copy_from_slice(data);
    let bytes = &param.buffer;

    Ok(match param.param_type {
        ParamType::Int8Array => ParamValue::Int8Array(decode_le_slice::<i8>(bytes)),
        ParamType::Int16Array => ParamValue::Int16Array(decode_le_slice::<i16>(bytes)),
        ParamType::Int32Array => ParamValue::Int32Array(decode_le_slice::<i32>(bytes)),
        ParamType::Float32Array => ParamValue::Float32Array(decode_le_slice::<f32>(bytes)),
        ParamType::Float64Array => ParamValue::Float64Array(decode_le_slice::<f64>(bytes)),
        ParamType::Int32 | ParamType::Float64 => ParamValue::Undefined,
    })
}


/// Encode a host value for writing to the parameter's PLC location. Arrays
/// shorter than the PLC symbol write a prefix.
pub fn encode_value(param : &mut AdsParamInfo, value : &ParamValue) -> Result<Vec<u8>, ParamError> {
    let info = type_info(param)?;

    if value.param_type() != Some(param.param_type) {
        return Err(ParamError::WrongType {
            index : param.index,
            actual : param.param_type.to_string(),
            requested : value.param_type().map(|t| t.to_string()).unwrap_or_else(|| "undefined".to_string())
        });
    }

    let bytes = match value {
        ParamValue::Int32(_) | ParamValue::Float64(_) if param.plc_is_array => {
            return Err(ParamError::Conversion {
                index : param.index,
                reason : format!("scalar cannot be written to a {} array", info.name)
            });
        },
        ParamValue::Int32(v) => {
            warn_width_once(param, info);
            info.encode_scalar(Number::Int(*v as i64))
                .map_err(|err| ParamError::Conversion { index : param.index, reason : err.to_string() })?
        },
        ParamValue::Float64(v) => {
            warn_width_once(param, info);
            info.encode_scalar(Number::Float(*v))
                .map_err(|err| ParamError::Conversion { index : param.index, reason : err.to_string() })?
        },
        ParamValue::Int8Array(v) => { array_type_check(param, info)?; encode_le_slice(v) },
        ParamValue::Int16Array(v) => { array_type_check(param, info)?; encode_le_slice(v) },
        ParamValue::Int32Array(v) => { array_type_check(param, info)?; encode_le_slice(v) },
        ParamValue::Float32Array(v) => { array_type_check(param, info)?; encode_le_slice(v) },
        ParamValue::Float64Array(v) => { array_type_check(param, info)?; encode_le_slice(v) },
        ParamValue::Undefined => Vec::new(),
    };

    if bytes.len() > param.plc_size as usize {
        return Err(ParamError::SizeMismatch {
            index : param.index,
            plc_size : param.plc_size as usize,
            value_size : bytes.len()
        });
    }

    Ok(bytes)
}


/// Timestamp for a value arriving now, with an optional PLC timestamp.
/// Never earlier than the previously committed timestamp.
fn select_timestamp(param : &mut AdsParamInfo, plc_timestamp : Option<u64>) -> SystemTime {
    let now = SystemTime::now();
    param.local_timestamp = Some(now);
    if plc_timestamp.is_some() {
        param.plc_timestamp = plc_timestamp;
    }

    let candidate = match (param.time_base, param.plc_timestamp) {
        (TimeBase::Plc, Some(filetime)) => filetime_to_system_time(filetime),
        _ => now,
    };

    match param.timestamp {
        Some(previous) if candidate < previous => previous,
        _ => candidate,
    }
}


/// Store a converted value and clear the alarm.
pub fn commit_value(param : &mut AdsParamInfo, value : ParamValue, plc_timestamp : Option<u64>) {
    param.timestamp = Some(select_timestamp(param, plc_timestamp));
    param.value = value;
    param.alarm = Alarm::NONE;
    param.first_read_done = true;
}

/// Raise an alarm. Returns true if the alarm changed.
pub fn set_alarm(param : &mut AdsParamInfo, status : AlarmStatus, severity : AlarmSeverity) -> bool {
    let alarm = Alarm::new(status, severity);
    if param.alarm == alarm {
        return false;
    }
    param.alarm = alarm;
    param.timestamp = Some(select_timestamp(param, None));
    true
}
