use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use authward::options::{self, Settings, EXIT_SPAWN, EXIT_STARTUP};
use authward::{logging, supervisor};

fn main() {
    let cli = options::parse_or_exit();

    let debug = std::env::var_os("SSHGUARD_DEBUG").is_some();
    logging::init(debug);

    let settings = match Settings::from_cli(cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("authward: {err:#}");
            std::process::exit(EXIT_STARTUP);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("authward: could not start runtime: {err}");
            std::process::exit(EXIT_SPAWN);
        }
    };

    if let Err(err) = runtime.block_on(supervisor::run(settings)) {
        eprintln!("authward: {err:#}");
        std::process::exit(EXIT_STARTUP);
    }
}
