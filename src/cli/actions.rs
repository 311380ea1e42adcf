use anyhow::{anyhow, Result};
use clap::ArgMatches;
use std::{path::Path, sync::Arc};

use super::{catalog, config::DriverConfig};
use crate::{
    api::{
        driver::{DriverBuilder, DriverEvent, LoggingHook},
        utils::available_ports,
    },
    protocol::{
        aurora::simulator::{AuroraSimulator, SimulatorFixture},
        engine::ConnectionState,
    },
};

/// Handle flags that print something and exit. Returns true if one was handled.
pub fn run_one_shot_actions(matches: &ArgMatches) -> bool {
    if matches.get_flag("list-ports") {
        let ports = match available_ports() {
            Ok(ports) => ports,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        };

        if matches.get_flag("json") {
            #[derive(serde::Serialize)]
            struct PortInfo<'a> {
                port_name: &'a str,
            }
            let out: Vec<PortInfo> = ports
                .iter()
                .map(|p| PortInfo { port_name: p })
                .collect();
            if let Ok(s) = serde_json::to_string_pretty(&out) {
                println!("{s}");
            }
        } else {
            for p in &ports {
                println!("{p}");
            }
        }
        return true;
    }

    false
}

fn load_config(matches: &ArgMatches) -> Result<DriverConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => DriverConfig::from_file(Path::new(path))?,
        None => DriverConfig::default(),
    };
    if let Some(port) = matches.get_one::<String>("port") {
        config.port = Some(port.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Start the driver described by the command line and print its updates.
pub fn run(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let json = matches.get_flag("json");
    let once = matches.get_flag("once");

    let builder = config
        .apply(DriverBuilder::new())
        .add_hook(Arc::new(LoggingHook))
        .with_bindings(|b| catalog::register(b, &config, json));

    let driver = if matches.contains_id("simulate") {
        let simulator = match matches.get_one::<String>("simulate") {
            Some(path) => AuroraSimulator::from_fixture(&SimulatorFixture::from_file(Path::new(path))?)?,
            None => AuroraSimulator::with_defaults(),
        };
        log::info!("Polling the built-in simulator");
        builder.build_with_transport(simulator)?
    } else {
        let port = config
            .port
            .as_deref()
            .ok_or_else(|| anyhow!("No serial port given. Use --port or set `port` in the config"))?;
        builder.with_port(port).build()?
    };

    let handle = driver.handle();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, stopping");
        // The poll thread may already be gone
        let _ = handle.stop();
    })?;

    for event in driver.events().iter() {
        report_event(&event, json)?;
        match event {
            DriverEvent::CycleCompleted { report, .. } if once => {
                if report.empty_plan {
                    driver.stop()?;
                    return Err(anyhow!("None of the enabled endpoints is supported by this controller"));
                }
                break;
            }
            DriverEvent::StateChanged {
                to: ConnectionState::Faulted,
                ..
            } if once => {
                driver.stop()?;
                return Err(anyhow!("Link faulted before a poll cycle completed"));
            }
            _ => {}
        }
    }

    driver.stop()
}

fn report_event(event: &DriverEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        DriverEvent::StateChanged { from, to, .. } => log::info!("Link {from} -> {to}"),
        DriverEvent::Identified { info, .. } => log::info!(
            "Identified {} (serial {}, program {}, ABC v{:.2}), features: {:?}",
            info.model,
            info.serial,
            info.program,
            info.abc_version,
            info.features
        ),
        DriverEvent::CycleCompleted { report, .. } => log::debug!(
            "Cycle completed: {} ok, {} failed",
            report.succeeded,
            report.failed
        ),
    }
    Ok(())
}
