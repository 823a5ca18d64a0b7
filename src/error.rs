//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Error types shared by the client and parameter modules.

use std::fmt;

use thiserror::Error;


pub const ADSERR_NOERR: u32 = 0x00;
pub const GLOBALERR_TARGET_PORT: u32 = 0x06;
pub const GLOBALERR_MISSING_ROUTE: u32 = 0x07;
pub const ADSERR_DEVICE_ERROR: u32 = 0x700;
pub const ADSERR_DEVICE_SRVNOTSUPP: u32 = 0x701;
pub const ADSERR_DEVICE_INVALIDGRP: u32 = 0x702;
pub const ADSERR_DEVICE_INVALIDOFFSET: u32 = 0x703;
pub const ADSERR_DEVICE_INVALIDSIZE: u32 = 0x705;
pub const ADSERR_DEVICE_NOTREADY: u32 = 0x70A;
pub const ADSERR_DEVICE_SYMBOLNOTFOUND: u32 = 0x710;
pub const ADSERR_DEVICE_NOTIFYHNDINVALID: u32 = 0x714;
pub const ADSERR_CLIENT_SYNCTIMEOUT: u32 = 0x745;
pub const ADSERR_CLIENT_PORTNOTOPEN: u32 = 0x748;
pub const ADSERR_CLIENT_NOAMSADDR: u32 = 0x749;


/// Return code of a failed ADS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub struct AdsError {
    pub code : u32
}

impl fmt::Display for AdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ADS error {:#x} ({})", self.code, ads_error_name(self.code))
    }
}

impl AdsError {
    pub fn new(code : u32) -> Self {
        Self { code }
    }

    /// True when the code indicates the target could not be reached at all,
    /// as opposed to a request the target rejected.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self.code,
            GLOBALERR_TARGET_PORT | GLOBALERR_MISSING_ROUTE | ADSERR_CLIENT_SYNCTIMEOUT | ADSERR_CLIENT_PORTNOTOPEN
        )
    }
}


/// Symbolic name for the ADS return codes this crate deals with.
pub fn ads_error_name(code : u32) -> &'static str {
    match code {
        ADSERR_NOERR => "no error",
        GLOBALERR_TARGET_PORT => "target port not found",
        GLOBALERR_MISSING_ROUTE => "target machine not found",
        ADSERR_DEVICE_ERROR => "general device error",
        ADSERR_DEVICE_SRVNOTSUPP => "service not supported",
        ADSERR_DEVICE_INVALIDGRP => "invalid index group",
        ADSERR_DEVICE_INVALIDOFFSET => "invalid index offset",
        ADSERR_DEVICE_INVALIDSIZE => "invalid size",
        ADSERR_DEVICE_NOTREADY => "device not ready",
        ADSERR_DEVICE_SYMBOLNOTFOUND => "symbol not found",
        ADSERR_DEVICE_NOTIFYHNDINVALID => "notification handle invalid",
        ADSERR_CLIENT_SYNCTIMEOUT => "client sync timeout",
        ADSERR_CLIENT_PORTNOTOPEN => "port not open",
        ADSERR_CLIENT_NOAMSADDR => "no AMS address",
        _ => "unknown",
    }
}


/// Errors returned to the host through the parameter entry points.
#[derive(Debug, Error)]
pub enum ParamError {
    /// Malformed drvInfo, unsupported data type or bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parameter table is full ({0} entries)")]
    TableFull(usize),

    #[error("no parameter with index {0}")]
    NoSuchParam(usize),

    /// The entry point used does not match the value type of the parameter.
    #[error("parameter {index} has type {actual}, not {requested}")]
    WrongType { index : usize, actual : String, requested : String },

    #[error("size mismatch for parameter {index}: PLC size {plc_size}, value size {value_size}")]
    SizeMismatch { index : usize, plc_size : usize, value_size : usize },

    /// The parameter has not been resolved against the PLC yet.
    #[error("parameter {0} is not resolved against the PLC")]
    NotResolved(usize),

    #[error("conversion failed for parameter {index}: {reason}")]
    Conversion { index : usize, reason : String },

    #[error(transparent)]
    Ads(#[from] AdsError),
}
