use aurora_link::{boot, cli};

fn main() {
    boot::init_logging();
    let matches = cli::parse_args();

    if cli::actions::run_one_shot_actions(&matches) {
        return;
    }

    if let Err(err) = cli::actions::run(&matches) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
