//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Creating parameters from a record configuration database.
//!
//! Records bind to the driver through an asyn link in their `INP` or `OUT`
//! field, `@asyn(<port>,<addr>,<timeout>)<drvInfo>`, and select the slot type
//! through `DTYP`.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Context;

use crate::error::ParamError;

use super::descriptor::ParamType;
use super::driver::AdsParamDriver;


const ASYN_LINK_PREFIX : &str = "@asyn(";


/// Read access to a record configuration database.
pub trait RecordDatabase {
    fn record_types(&self) -> Vec<String>;
    fn records(&self, record_type : &str) -> Vec<String>;
    /// Value of a field of a record, if the record has it.
    fn field(&self, record : &str, field : &str) -> Option<String>;
}


/// A parsed `@asyn(port,addr,timeout)drvInfo` link.
#[derive(Debug, Clone, PartialEq)]
pub struct AsynLink {
    pub port : String,
    pub addr : i32,
    pub timeout : Option<f64>,
    pub drv_info : String
}

impl FromStr for AsynLink {
    type Err = ParamError;

    fn from_str(s : &str) -> Result<Self, Self::Err> {
        let bad = |reason : &str| ParamError::Config(format!("Invalid asyn link '{}': {}", s, reason));

        let rest = s.trim().strip_prefix(ASYN_LINK_PREFIX).ok_or_else(|| bad("missing @asyn("))?;
        let close = rest.find(')').ok_or_else(|| bad("missing ')'"))?;
        let (args, drv_info) = (&rest[..close], rest[close + 1..].trim());

        let mut args = args.split(',').map(str::trim);
        let port = args.next().filter(|p| !p.is_empty()).ok_or_else(|| bad("no port name"))?;

        let addr = match args.next() {
            Some(a) if !a.is_empty() => a.parse::<i32>().map_err(|_| bad("address is not an integer"))?,
            _ => 0,
        };
        let timeout = match args.next() {
            Some(t) if !t.is_empty() => Some(t.parse::<f64>().map_err(|_| bad("timeout is not a number"))?),
            _ => None,
        };

        if drv_info.is_empty() {
            return Err(bad("no drvInfo"));
        }

        Ok(AsynLink {
            port : port.to_string(),
            addr,
            timeout,
            drv_info : drv_info.to_string()
        })
    }
}


/// Slot type for a record's `DTYP`. None for device types this driver does
/// not serve.
pub fn param_type_for_dtyp(dtyp : &str) -> Option<ParamType> {
    match dtyp.trim() {
        "asynInt32" => Some(ParamType::Int32),
        "asynFloat64" => Some(ParamType::Float64),
        "asynInt8ArrayIn" | "asynInt8ArrayOut" => Some(ParamType::Int8Array),
        "asynInt16ArrayIn" | "asynInt16ArrayOut" => Some(ParamType::Int16Array),
        "asynInt32ArrayIn" | "asynInt32ArrayOut" => Some(ParamType::Int32Array),
        "asynFloat32ArrayIn" | "asynFloat32ArrayOut" => Some(ParamType::Float32Array),
        "asynFloat64ArrayIn" | "asynFloat64ArrayOut" => Some(ParamType::Float64Array),
        _ => None,
    }
}


/// In-memory record database, used by the demo program and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordDatabase {
    /// record type -> record name -> field -> value
    records : BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>
}

impl StaticRecordDatabase {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record_type : &str, name : &str, fields : &[(&str, &str)]) {
        let record = self.records
            .entry(record_type.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default();

        for (field, value) in fields {
            record.insert(field.to_string(), value.to_string());
        }
    }

    pub fn with_record(mut self, record_type : &str, name : &str, fields : &[(&str, &str)]) -> Self {
        self.add_record(record_type, name, fields);
        self
    }
}

impl RecordDatabase for StaticRecordDatabase {

    fn record_types(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    fn records(&self, record_type : &str) -> Vec<String> {
        self.records.get(record_type)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn field(&self, record : &str, field : &str) -> Option<String> {
        self.records.values()
            .find_map(|r| r.get(record))
            .and_then(|fields| fields.get(field).cloned())
    }
}


fn asyn_link(db : &dyn RecordDatabase, record : &str) -> Option<String> {
    ["INP", "OUT"].iter()
        .filter_map(|field| db.field(record, field))
        .find(|link| link.trim_start().starts_with(ASYN_LINK_PREFIX))
}


impl AdsParamDriver {

    /// Create a parameter for every record linked to this driver's port.
    /// Returns the number of records bound.
    pub fn create_params_from_records(&self, db : &dyn RecordDatabase) -> Result<usize, anyhow::Error> {
        let port_name = self.config().port_name.clone();
        let mut bound = 0;

        for record_type in db.record_types() {
            for record in db.records(&record_type) {
                let Some(param_type) = db.field(&record, "DTYP").and_then(|d| param_type_for_dtyp(&d)) else {
                    continue;
                };
                let Some(link) = asyn_link(db, &record) else {
                    continue;
                };

                let link : AsynLink = match link.parse() {
                    Ok(link) => link,
                    Err(err) => {
                        log::debug!("Skipping record {}: {}", record, err);
                        continue;
                    }
                };
                if link.port != port_name {
                    continue;
                }

                self.create_param_for_record(&link.drv_info, param_type, Some(&record))
                    .with_context(|| format!("Record {} ({}) has an invalid link '{}'", record, record_type, link.drv_info))?;
                bound += 1;
            }
        }

        log::info!("Bound {} records to port {}", bound, port_name);
        Ok(bound)
    }
}
