//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//


//! Types used through the client module: addressing, device state and the
//! fixed-layout structures exchanged with the ADS router.


use std::fmt;
use std::str::FromStr;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::ParamError;


/// Index group: read a symbol handle by name (read/write request).
pub const ADSIGRP_SYM_HNDBYNAME: u32 = 0xF003;
/// Index group: read/write a value through a symbol handle.
pub const ADSIGRP_SYM_VALBYHND: u32 = 0xF005;
/// Index group: release a symbol handle.
pub const ADSIGRP_SYM_RELEASEHND: u32 = 0xF006;
/// Index group: symbol table version counter. Changes when the PLC program is reloaded.
pub const ADSIGRP_SYM_VERSION: u32 = 0xF008;
/// Index group: extended symbol information by name (read/write request).
pub const ADSIGRP_SYM_INFOBYNAMEEX: u32 = 0xF009;
/// Index group: device data (ADS state etc).
pub const ADSIGRP_DEVICE_DATA: u32 = 0xF100;
/// Index offset of the ADS state within ADSIGRP_DEVICE_DATA.
pub const ADSIOFFS_DEVDATA_ADSSTATE: u32 = 0x0000;

/// Default ADS port of the first PLC runtime.
pub const AMSPORT_R0_PLC_TC3: u16 = 851;

/// Number of 100ns protocol time units in one millisecond.
pub const ADS_TICKS_PER_MS: f64 = 10_000.0;



/// The AMS Net ID identifying a TwinCAT system on the ADS network.
/// Written as six dotted bytes, e.g. 192.168.1.10.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AmsNetId {
    pub b : [u8; 6]
}

impl AmsNetId {
    pub fn new(b : [u8; 6]) -> Self {
        Self { b }
    }
}

impl FromStr for AmsNetId {
    type Err = ParamError;

    /// Parse the dotted notation. Anything other than exactly six
    /// byte-sized tokens is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {

        let tokens = s.trim().split('.').collect::<Vec<_>>();

        if tokens.len() != 6 {
            return Err(ParamError::Config(format!(
                "AMS Net ID '{}' does not contain 6 tokens. Num tokens: {}", s, tokens.len()
            )));
        }

        let mut ret = AmsNetId::default();
        for (i, token) in tokens.iter().enumerate() {
            match u8::from_str(token) {
                Ok(b) => ret.b[i] = b,
                Err(err) => {
                    return Err(ParamError::Config(format!(
                        "Error parsing token '{}' of AMS Net ID '{}': {}", token, s, err
                    )));
                }
            }
        }

        return Ok(ret);
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}.{}.{}",
            self.b[0], self.b[1], self.b[2], self.b[3], self.b[4], self.b[5]
        )
    }
}


/// Full target address of an ADS device: the Net ID of the system plus the
/// ADS port of the runtime within that system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmsAddr {
    pub net_id : AmsNetId,
    pub port : u16
}

impl AmsAddr {
    pub fn new(net_id : AmsNetId, port : u16) -> Self {
        Self { net_id, port }
    }
}

impl fmt::Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}



/// State of an ADS device as reported by ReadState.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AdsState {
    Invalid = 0,
    Idle = 1,
    Reset = 2,
    Init = 3,
    Start = 4,
    Run = 5,
    Stop = 6,
    SaveConfig = 7,
    LoadConfig = 8,
    PowerFailure = 9,
    PowerGood = 10,
    Error = 11,
    Shutdown = 12,
    Suspend = 13,
    Resume = 14,
    Config = 15,
    Reconfig = 16,
    Stopping = 17,
    Incompatible = 18,
    Exception = 19,
}

impl From<u16> for AdsState {
    fn from(value: u16) -> Self {
        match value {
            1 => AdsState::Idle,
            2 => AdsState::Reset,
            3 => AdsState::Init,
            4 => AdsState::Start,
            5 => AdsState::Run,
            6 => AdsState::Stop,
            7 => AdsState::SaveConfig,
            8 => AdsState::LoadConfig,
            9 => AdsState::PowerFailure,
            10 => AdsState::PowerGood,
            11 => AdsState::Error,
            12 => AdsState::Shutdown,
            13 => AdsState::Suspend,
            14 => AdsState::Resume,
            15 => AdsState::Config,
            16 => AdsState::Reconfig,
            17 => AdsState::Stopping,
            18 => AdsState::Incompatible,
            19 => AdsState::Exception,
            _ => AdsState::Invalid,
        }
    }
}

impl fmt::Display for AdsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}


/// Result of a ReadState request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub ads_state : AdsState,
    pub device_state : u16
}


/// Version block of ReadDeviceInfo, laid out as on the wire.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdsVersion {
    pub version : u8,
    pub revision : u8,
    pub build : u16
}

impl fmt::Display for AdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.version, self.revision, self.build)
    }
}


/// Name and version of an ADS device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub name : String,
    pub version : AdsVersion
}



/// Transmission mode of a device notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TransMode {
    NoTrans = 0,
    ClientCycle = 1,
    ClientOnChange = 2,
    ServerCycle = 3,
    ServerOnChange = 4,
}


/// Attributes of a device notification. Cycle time and max delay are in
/// protocol time units (100ns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationAttrib {
    /// Number of bytes the server sends per sample.
    pub length : u32,
    pub trans_mode : TransMode,
    pub max_delay : u32,
    pub cycle_time : u32
}

impl NotificationAttrib {

    /// On-change attributes with the timing given in milliseconds.
    pub fn on_change(length : u32, sample_time_ms : f64, max_delay_ms : f64) -> Self {
        Self {
            length,
            trans_mode : TransMode::ServerOnChange,
            max_delay : ms_to_ads_ticks(max_delay_ms),
            cycle_time : ms_to_ads_ticks(sample_time_ms)
        }
    }
}


/// Convert milliseconds to 100ns ticks, saturating at the u32 range.
pub fn ms_to_ads_ticks(ms : f64) -> u32 {
    if ms <= 0.0 {
        return 0;
    }
    let ticks = ms * ADS_TICKS_PER_MS;
    if ticks >= u32::MAX as f64 {
        return u32::MAX;
    }
    return ticks as u32;
}



/// Header of the ADSIGRP_SYM_INFOBYNAMEEX response. The symbol name, type name
/// and comment follow the header, each null-terminated.
#[repr(C, packed)]
#[derive(FromZeroes, FromBytes, AsBytes, Debug, Clone, Copy, Default)]
pub struct AdsSymbolEntry {
    pub entry_length : u32,
    pub group : u32,
    pub offset : u32,
    pub size : u32,
    pub data_type : u32,
    pub flags : u32,
    pub name_length : u16,
    pub type_length : u16,
    pub comment_length : u16
}

impl AdsSymbolEntry {
    /// Size of the fixed header on the wire.
    pub const HEADER_LEN : usize = std::mem::size_of::<AdsSymbolEntry>();
}



#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn parse_net_id() {
        let id = AmsNetId::from_str("192.168.127.1.1.1").unwrap();
        assert_eq!(id.b, [192, 168, 127, 1, 1, 1]);
        assert_eq!(id.to_string(), "192.168.127.1.1.1");
    }

    #[test]
    fn reject_short_or_oversized_net_id() {
        assert!(AmsNetId::from_str("192.168.1.1").is_err());
        assert!(AmsNetId::from_str("192.168.1.1.1.300").is_err());
        assert!(AmsNetId::from_str("").is_err());
    }

    #[test]
    fn symbol_entry_header_is_packed() {
        assert_eq!(AdsSymbolEntry::HEADER_LEN, 30);
    }

    #[test]
    fn tick_conversion_saturates() {
        assert_eq!(ms_to_ads_ticks(10.0), 100_000);
        assert_eq!(ms_to_ads_ticks(-1.0), 0);
        assert_eq!(ms_to_ads_ticks(1.0e9), u32::MAX);
    }

    #[test]
    fn unknown_state_maps_to_invalid() {
        assert_eq!(AdsState::from(5), AdsState::Run);
        assert_eq!(AdsState::from(999), AdsState::Invalid);
    }
}
