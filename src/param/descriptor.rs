//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! The parameter descriptor: one per configured PLC variable or local
//! pseudo-variable, owned by the parameter table.

use std::fmt;
use std::time::SystemTime;

use crate::client::ads_data::AdsDataTypeId;

use super::drv_info::{AddressSpec, Direction, DrvInfo, TimeBase};


/// Type of the host value slot a parameter feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Int32,
    Float64,
    Int8Array,
    Int16Array,
    Int32Array,
    Float32Array,
    Float64Array
}

impl ParamType {

    pub fn is_array(&self) -> bool {
        !matches!(self, ParamType::Int32 | ParamType::Float64)
    }

    /// Width in bytes of one element of the slot.
    pub fn element_width(&self) -> usize {
        match self {
            ParamType::Int8Array => 1,
            ParamType::Int16Array => 2,
            ParamType::Int32 | ParamType::Int32Array | ParamType::Float32Array => 4,
            ParamType::Float64 | ParamType::Float64Array => 8,
        }
    }

    /// True if an array slot of this type can hold elements of a PLC type.
    pub fn accepts_array_of(&self, plc_type : AdsDataTypeId) -> bool {
        use AdsDataTypeId::*;
        match self {
            ParamType::Int8Array => matches!(plc_type, Int8 | UInt8 | Bit | String),
            ParamType::Int16Array => matches!(plc_type, Int16 | UInt16),
            ParamType::Int32Array => matches!(plc_type, Int32 | UInt32),
            ParamType::Float32Array => plc_type == Real32,
            ParamType::Float64Array => plc_type == Real64,
            ParamType::Int32 | ParamType::Float64 => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}


/// A value as held in a host value slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamValue {
    /// Never read or written.
    #[default]
    Undefined,
    Int32(i32),
    Float64(f64),
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>)
}

impl ParamValue {

    pub fn param_type(&self) -> Option<ParamType> {
        match self {
            ParamValue::Undefined => None,
            ParamValue::Int32(_) => Some(ParamType::Int32),
            ParamValue::Float64(_) => Some(ParamType::Float64),
            ParamValue::Int8Array(_) => Some(ParamType::Int8Array),
            ParamValue::Int16Array(_) => Some(ParamType::Int16Array),
            ParamValue::Int32Array(_) => Some(ParamType::Int32Array),
            ParamValue::Float32Array(_) => Some(ParamType::Float32Array),
            ParamValue::Float64Array(_) => Some(ParamType::Float64Array),
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, ParamValue::Undefined)
    }

    /// Number of elements for arrays, 1 for scalars.
    pub fn len(&self) -> usize {
        match self {
            ParamValue::Undefined => 0,
            ParamValue::Int32(_) | ParamValue::Float64(_) => 1,
            ParamValue::Int8Array(v) => v.len(),
            ParamValue::Int16Array(v) => v.len(),
            ParamValue::Int32Array(v) => v.len(),
            ParamValue::Float32Array(v) => v.len(),
            ParamValue::Float64Array(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmStatus {
    NoAlarm,
    Comm,
    Read,
    Write,
    Udf,
    Soft
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlarmSeverity {
    NoAlarm,
    Minor,
    Major,
    Invalid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    pub status : AlarmStatus,
    pub severity : AlarmSeverity
}

impl Alarm {
    pub const NONE : Alarm = Alarm { status : AlarmStatus::NoAlarm, severity : AlarmSeverity::NoAlarm };
    /// Value never received.
    pub const UNDEFINED : Alarm = Alarm { status : AlarmStatus::Udf, severity : AlarmSeverity::Invalid };

    pub fn new(status : AlarmStatus, severity : AlarmSeverity) -> Self {
        Self { status, severity }
    }

    pub fn is_active(&self) -> bool {
        self.severity != AlarmSeverity::NoAlarm
    }
}

impl Default for Alarm {
    fn default() -> Self {
        Alarm::NONE
    }
}


/// Where a parameter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    Plc,
    /// Driver-internal value, never resolved against the PLC.
    LocalState
}


#[derive(Debug, Clone)]
pub struct AdsParamInfo {
    /// Position in the parameter table. Stable for the life of the driver.
    pub index : usize,
    /// The drvInfo key the parameter was created from.
    pub drv_info : String,
    /// Name of the record bound to the parameter, if created from one.
    pub record_name : Option<String>,
    pub param_type : ParamType,
    pub source : ParamSource,
    pub direction : Direction,
    pub ads_port : u16,

    /// Symbol to resolve. None for absolute and local addresses.
    pub symbol_name : Option<String>,
    /// Caller-supplied absolute address rather than a symbol.
    pub is_address_command : bool,
    pub group : u32,
    pub offset : u32,
    pub address_valid : bool,
    /// Size in bytes reported by the PLC.
    pub plc_size : u32,
    pub plc_type : Option<AdsDataTypeId>,
    pub plc_type_name : String,
    pub plc_is_array : bool,

    pub sample_time_ms : f64,
    pub max_delay_ms : f64,
    pub time_base : TimeBase,

    /// Live notification handle. Some only while subscribed.
    pub notification : Option<u32>,
    /// Notification registered by a resolve that has not committed yet.
    pub pending_notification : Option<u32>,
    /// Newest sample of the pending notification: (timestamp, bytes).
    pub pending_sample : Option<(u64, Vec<u8>)>,
    pub symbol_handle : Option<u32>,
    /// Handles replaced by an invalidation, released on the next resolve.
    pub stale_notifications : Vec<u32>,
    pub stale_symbol_handles : Vec<u32>,
    /// Bumped by every invalidation. A resolve started before an
    /// invalidation does not commit.
    pub generation : u64,

    /// Raw PLC bytes of array parameters. Always `plc_size` long.
    pub buffer : Vec<u8>,
    pub value : ParamValue,
    pub alarm : Alarm,
    pub refresh_needed : bool,
    pub first_read_done : bool,
    /// Last timestamp received from the PLC, as FILETIME.
    pub plc_timestamp : Option<u64>,
    pub local_timestamp : Option<SystemTime>,
    /// Timestamp of the committed value.
    pub timestamp : Option<SystemTime>,
    pub width_warned : bool
}

impl AdsParamInfo {

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index : usize,
        drv_info : &str,
        parsed : &DrvInfo,
        param_type : ParamType,
        ads_port : u16,
        sample_time_ms : f64,
        max_delay_ms : f64,
        time_base : TimeBase
    ) -> Self {
        let mut param = Self {
            index,
            drv_info : drv_info.trim().to_string(),
            record_name : None,
            param_type,
            source : ParamSource::Plc,
            direction : parsed.direction,
            ads_port,
            symbol_name : None,
            is_address_command : false,
            group : 0,
            offset : 0,
            address_valid : false,
            plc_size : 0,
            plc_type : None,
            plc_type_name : String::new(),
            plc_is_array : false,
            sample_time_ms,
            max_delay_ms,
            time_base,
            notification : None,
            pending_notification : None,
            pending_sample : None,
            symbol_handle : None,
            stale_notifications : Vec::new(),
            stale_symbol_handles : Vec::new(),
            generation : 0,
            buffer : Vec::new(),
            value : ParamValue::Undefined,
            alarm : Alarm::UNDEFINED,
            refresh_needed : true,
            first_read_done : false,
            plc_timestamp : None,
            local_timestamp : None,
            timestamp : None,
            width_warned : false
        };

        match &parsed.address {
            AddressSpec::Symbol(name) => {
                param.symbol_name = Some(name.clone());
            },
            AddressSpec::Absolute { group, offset, size, data_type } => {
                param.is_address_command = true;
                param.group = *group;
                param.offset = *offset;
                param.plc_size = *size;
                param.plc_type = Some(*data_type);
            },
            AddressSpec::LocalState => {
                param.source = ParamSource::LocalState;
                param.refresh_needed = false;
            },
        }

        param
    }

    /// Address for log messages.
    pub fn address(&self) -> String {
        match (&self.symbol_name, self.source) {
            (Some(name), _) => name.clone(),
            (None, ParamSource::LocalState) => super::drv_info::LOCAL_STATE_MARKER.to_string(),
            (None, ParamSource::Plc) => format!("{:#x}:{:#x}", self.group, self.offset),
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    pub fn is_subscribed(&self) -> bool {
        self.notification.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.source == ParamSource::LocalState
    }

    pub fn matches_port(&self, filter : Option<u16>) -> bool {
        filter.map_or(true, |port| port == self.ads_port)
    }

    /// Mark the parameter for refresh. Live handles become stale and are
    /// released on the next resolve.
    pub fn invalidate(&mut self) {
        if self.is_local() {
            return;
        }

        if let Some(handle) = self.notification.take() {
            self.stale_notifications.push(handle);
        }
        if let Some(handle) = self.symbol_handle.take() {
            self.stale_symbol_handles.push(handle);
        }
        if !self.is_address_command {
            self.address_valid = false;
        }
        self.refresh_needed = true;
        self.generation += 1;
    }

    /// Size the array buffer to the PLC size. A changed size yields a fresh,
    /// zeroed buffer.
    pub fn resize_buffer(&mut self, plc_size : u32) {
        if self.buffer.len() != plc_size as usize {
            self.buffer = vec![0u8; plc_size as usize];
        }
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    fn param(key : &str, param_type : ParamType) -> AdsParamInfo {
        let parsed : DrvInfo = key.parse().unwrap();
        AdsParamInfo::new(0, key, &parsed, param_type, 851, 50.0, 100.0, TimeBase::Epics)
    }

    #[test]
    fn new_symbol_param_needs_refresh() {
        let p = param("MAIN.fValue?", ParamType::Float64);
        assert!(p.refresh_needed);
        assert!(!p.is_subscribed());
        assert_eq!(p.alarm, Alarm::UNDEFINED);
        assert_eq!(p.symbol_name.as_deref(), Some("MAIN.fValue"));
    }

    #[test]
    fn local_state_never_needs_refresh() {
        let mut p = param(".AMSPORTSTATE.?", ParamType::Int32);
        assert!(p.is_local());
        assert!(!p.refresh_needed);
        p.invalidate();
        assert!(!p.refresh_needed);
    }

    #[test]
    fn invalidate_moves_handles_to_stale() {
        let mut p = param("MAIN.nValue?", ParamType::Int32);
        p.notification = Some(3);
        p.symbol_handle = Some(9);
        p.refresh_needed = false;

        p.invalidate();
        assert!(p.refresh_needed);
        assert!(!p.is_subscribed());
        assert_eq!(p.stale_notifications, vec![3]);
        assert_eq!(p.stale_symbol_handles, vec![9]);
        assert_eq!(p.generation, 1);
    }

    #[test]
    fn resize_zero_fills() {
        let mut p = param("MAIN.aData?", ParamType::Int8Array);
        p.resize_buffer(4);
        p.buffer.copy_from_slice(&[1, 2, 3, 4]);
        p.resize_buffer(4);
        assert_eq!(p.buffer, vec![1, 2, 3, 4]);
        p.resize_buffer(6);
        assert_eq!(p.buffer, vec![0; 6]);
    }

    #[test]
    fn array_slot_compatibility() {
        assert!(ParamType::Int8Array.accepts_array_of(AdsDataTypeId::String));
        assert!(ParamType::Int16Array.accepts_array_of(AdsDataTypeId::UInt16));
        assert!(!ParamType::Int32Array.accepts_array_of(AdsDataTypeId::Real32));
        assert!(!ParamType::Float64.accepts_array_of(AdsDataTypeId::Real64));
    }
}
