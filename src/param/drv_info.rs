//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Parser for the drvInfo key that identifies a parameter.
//!
//! ```text
//! drvInfo  := (option '/')* address direction
//! option   := ADSPORT=<n> | T_DLY_MS=<ms> | TS_MS=<ms> | TIMEBASE=PLC|EPICS
//! address  := .AMSPORTSTATE.
//!           | .ADR.16#<group>,16#<offset>,<size>,<type>
//!           | <symbol name>
//! direction:= '?' (input, subscribed) | '=' (output)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::client::ads_data::{AdsDataTypeId, AdsTypeInfo};
use crate::error::ParamError;


/// Address of the pseudo-variable carrying the ADS state of a port.
pub const LOCAL_STATE_MARKER : &str = ".AMSPORTSTATE.";
pub const ABSOLUTE_ADDRESS_PREFIX : &str = ".ADR.";


/// Clock used to timestamp committed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBase {
    /// Timestamp carried by the PLC notification.
    Plc,
    /// Local clock of this host.
    Epics
}

impl FromStr for TimeBase {
    type Err = ParamError;

    fn from_str(s : &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLC" => Ok(TimeBase::Plc),
            "EPICS" => Ok(TimeBase::Epics),
            other => Err(ParamError::Config(format!("Unknown TIMEBASE '{}', expected PLC or EPICS", other))),
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Trailing '?'. Subscribed for change notifications.
    Input,
    /// Trailing '='. Written by the host, never subscribed.
    Output
}


#[derive(Debug, Clone, PartialEq)]
pub enum AddressSpec {
    Symbol(String),
    Absolute { group : u32, offset : u32, size : u32, data_type : AdsDataTypeId },
    LocalState
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Symbol(name) => write!(f, "{}", name),
            AddressSpec::Absolute { group, offset, size, data_type } => {
                write!(f, "{}16#{:X},16#{:X},{},{}", ABSOLUTE_ADDRESS_PREFIX, group, offset, size, *data_type as u32)
            },
            AddressSpec::LocalState => write!(f, "{}", LOCAL_STATE_MARKER),
        }
    }
}


/// A parsed drvInfo key.
#[derive(Debug, Clone, PartialEq)]
pub struct DrvInfo {
    pub ads_port : Option<u16>,
    pub max_delay_ms : Option<f64>,
    pub sample_time_ms : Option<f64>,
    pub time_base : Option<TimeBase>,
    pub address : AddressSpec,
    pub direction : Direction
}

impl DrvInfo {

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }
}


fn parse_ms(key : &str, value : &str) -> Result<f64, ParamError> {
    match value.trim().parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms >= 0.0 => Ok(ms),
        _ => Err(ParamError::Config(format!("{} needs a non-negative number of milliseconds, got '{}'", key, value))),
    }
}

/// Parse "16#1F" as hex. Plain decimal is accepted too.
fn parse_iec_u32(token : &str) -> Result<u32, ParamError> {
    let token = token.trim();
    let parsed = match token.strip_prefix("16#") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => token.parse::<u32>(),
    };
    parsed.map_err(|err| ParamError::Config(format!("Bad number '{}' in absolute address: {}", token, err)))
}

fn parse_absolute(spec : &str) -> Result<AddressSpec, ParamError> {
    let fields : Vec<&str> = spec.split(',').collect();
    if fields.len() != 4 {
        return Err(ParamError::Config(format!(
            "Absolute address '{}' needs group, offset, size and type", spec
        )));
    }

    let group = parse_iec_u32(fields[0])?;
    let offset = parse_iec_u32(fields[1])?;
    let size = parse_iec_u32(fields[2])?;
    let raw_type = parse_iec_u32(fields[3])?;

    if size == 0 {
        return Err(ParamError::Config(format!("Absolute address '{}' has size 0", spec)));
    }

    let info = AdsTypeInfo::lookup(raw_type)
        .ok_or_else(|| ParamError::Config(format!("Unsupported ADS data type {} in '{}'", raw_type, spec)))?;

    Ok(AddressSpec::Absolute { group, offset, size, data_type : info.id })
}


impl FromStr for DrvInfo {
    type Err = ParamError;

    fn from_str(s : &str) -> Result<Self, Self::Err> {
        let key = s.trim();

        let (body, direction) = if let Some(body) = key.strip_suffix('?') {
            (body, Direction::Input)
        }
        else if let Some(body) = key.strip_suffix('=') {
            (body, Direction::Output)
        }
        else {
            return Err(ParamError::Config(format!("drvInfo '{}' must end with '?' or '='", key)));
        };

        let mut tokens : Vec<&str> = body.split('/').collect();
        let address = tokens.pop().unwrap_or("").trim();
        if address.is_empty() {
            return Err(ParamError::Config(format!("drvInfo '{}' has no address", key)));
        }

        let mut info = DrvInfo {
            ads_port : None,
            max_delay_ms : None,
            sample_time_ms : None,
            time_base : None,
            address : AddressSpec::LocalState,
            direction
        };

        for token in tokens {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (option, value) = token.split_once('=')
                .ok_or_else(|| ParamError::Config(format!("Option '{}' in drvInfo '{}' is not KEY=VALUE", token, key)))?;

            match option.trim().to_ascii_uppercase().as_str() {
                "ADSPORT" => {
                    let port = value.trim().parse::<u16>()
                        .map_err(|err| ParamError::Config(format!("Bad ADSPORT '{}': {}", value, err)))?;
                    info.ads_port = Some(port);
                },
                "T_DLY_MS" => info.max_delay_ms = Some(parse_ms(option, value)?),
                "TS_MS" => info.sample_time_ms = Some(parse_ms(option, value)?),
                "TIMEBASE" => info.time_base = Some(value.parse()?),
                other => {
                    return Err(ParamError::Config(format!("Unknown option '{}' in drvInfo '{}'", other, key)));
                }
            }
        }

        info.address = if address == LOCAL_STATE_MARKER {
            AddressSpec::LocalState
        }
        else if let Some(spec) = address.strip_prefix(ABSOLUTE_ADDRESS_PREFIX) {
            parse_absolute(spec)?
        }
        else {
            AddressSpec::Symbol(address.to_string())
        };

        if info.address == AddressSpec::LocalState && direction != Direction::Input {
            return Err(ParamError::Config(format!("{} is read-only, '{}' must end with '?'", LOCAL_STATE_MARKER, key)));
        }

        Ok(info)
    }
}
