//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Runs the parameter driver against a simulated PLC and logs every value
//! it republishes until Ctrl+C.
//!
//! Usage: paramtest [config.json]

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use simplelog::*;

use adsparams_rs::client::AdsDataTypeId;
use adsparams_rs::param::StaticRecordDatabase;
use adsparams_rs::{AdsParamDriver, DriverConfig, ParamValue, SimulatedTarget};


fn demo_records(port_name : &str) -> StaticRecordDatabase {
    let records = [
        ("longin", "DEMO:COUNTER", "asynInt32", "INP", "MAIN.nCounter?"),
        ("ai", "DEMO:TEMP", "asynFloat64", "INP", "TS_MS=100/TIMEBASE=PLC/MAIN.fTemperature?"),
        ("ao", "DEMO:SETPOINT", "asynFloat64", "OUT", "MAIN.fSetpoint="),
        ("waveform", "DEMO:PROFILE", "asynFloat32ArrayIn", "INP", "MAIN.aProfile?"),
        ("longin", "DEMO:STATE", "asynInt32", "INP", ".AMSPORTSTATE.?"),
    ];

    let mut db = StaticRecordDatabase::new();
    for (record_type, name, dtyp, field, drv_info) in records {
        let link = format!("@asyn({},0,1){}", port_name, drv_info);
        db.add_record(record_type, name, &[("DTYP", dtyp), (field, link.as_str())]);
    }
    db
}


/// Main entry point of the program.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    ])?;

    let config = match std::env::args().nth(1) {
        Some(path) => DriverConfig::from_json_file(&path)?,
        None => DriverConfig::default(),
    };
    let ads_port = config.default_ads_port;

    let sim = Arc::new(SimulatedTarget::new(config.target_net_id.parse()?));
    sim.add_port(ads_port);
    sim.add_symbol(ads_port, "MAIN.nCounter", AdsDataTypeId::Int32, 4);
    sim.add_symbol(ads_port, "MAIN.fTemperature", AdsDataTypeId::Real64, 8);
    sim.add_symbol(ads_port, "MAIN.fSetpoint", AdsDataTypeId::Real64, 8);
    sim.add_symbol(ads_port, "MAIN.aProfile", AdsDataTypeId::Real32, 32);

    let (driver, mut rx) = AdsParamDriver::new(config.clone(), sim.clone())?;
    driver.connect()?;

    let bound = driver.create_params_from_records(&demo_records(&config.port_name))?;
    info!("{} records bound", bound);

    driver.set_host_ready();
    driver.start_supervisor()?;

    // Play the PLC: count and drift the temperature.
    let plc = sim.clone();
    let plc_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        let mut cycle : i32 = 0;
        loop {
            interval.tick().await;
            cycle = cycle.wrapping_add(1);
            plc.set_symbol_value(ads_port, "MAIN.nCounter", &cycle.to_le_bytes());
            let temperature = 20.0 + f64::from(cycle % 40) * 0.25;
            plc.set_symbol_value(ads_port, "MAIN.fTemperature", &temperature.to_le_bytes());
        }
    });

    let mut wrote_setpoint = false;

    loop {
        tokio::select! {
            notification = rx.recv() => {
                let Some(notification) = notification else { break };
                info!(
                    "{} [{}] = {:?} ({:?})",
                    notification.record.as_deref().unwrap_or("-"),
                    notification.name,
                    notification.value,
                    notification.alarm.status
                );

                if !wrote_setpoint && notification.value != ParamValue::Undefined {
                    if let Some(index) = driver.find_param("MAIN.fSetpoint=") {
                        match driver.write_float64(index, 42.5) {
                            Ok(()) => {
                                info!("Wrote setpoint.");
                                wrote_setpoint = true;
                            },
                            Err(err) => error!("Failed to write setpoint: {}", err),
                        }
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down.");
                break;
            }
        }
    }

    plc_task.abort();
    driver.shutdown();

    info!("Goodbye...");
    Ok(())
}
