//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Parameters: host value slots bound to PLC variables, and the machinery
//! that keeps them resolved, subscribed and current.

pub mod drv_info;
pub mod descriptor;
pub mod port_info;
pub mod table;
pub mod convert;
mod lifecycle;
mod supervisor;
pub mod driver;
pub mod records;

pub use drv_info::{AddressSpec, Direction, DrvInfo, TimeBase};
pub use descriptor::{AdsParamInfo, Alarm, AlarmSeverity, AlarmStatus, ParamSource, ParamType, ParamValue};
pub use port_info::AmsPortInfo;
pub use convert::ParamNotification;
pub use driver::AdsParamDriver;
pub use records::{param_type_for_dtyp, AsynLink, RecordDatabase, StaticRecordDatabase};
pub use supervisor::NOT_CONNECTED_LIMIT;
