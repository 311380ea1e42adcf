pub mod actions;
pub mod catalog;
pub mod config;
pub mod output;

use clap::{Arg, ArgMatches, Command};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

fn build_command() -> Command {
    Command::new("aurora-link")
        .about("Poll a WaterFurnace Aurora heat pump controller over RS-485")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (TOML, or JSON with a .json extension)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port, overriding the configuration")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .help("Poll the built-in simulator, optionally seeded from a fixture file")
                .value_name("FIXTURE")
                .num_args(0..=1)
                .conflicts_with("port"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Exit after the first poll cycle")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print updates and events as JSON lines")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate_flags() {
        let matches = build_command()
            .try_get_matches_from(["aurora-link", "--simulate", "--once", "-j"])
            .unwrap();
        assert!(matches.contains_id("simulate"));
        assert!(matches.get_one::<String>("simulate").is_none());
        assert!(matches.get_flag("once"));
        assert!(matches.get_flag("json"));

        let matches = build_command()
            .try_get_matches_from(["aurora-link", "--simulate", "fixtures/default.toml"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("simulate").map(String::as_str),
            Some("fixtures/default.toml")
        );
    }

    #[test]
    fn test_simulate_conflicts_with_port() {
        assert!(build_command()
            .try_get_matches_from(["aurora-link", "--simulate", "-p", "/dev/ttyUSB0"])
            .is_err());
    }
}
