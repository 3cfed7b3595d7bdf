mod commands;
mod terminal;

use commands::{CommandLine, scan};
use smbscout_common::config::Config;
use terminal::{logging, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();
    let cfg: Config = commands.config();

    logging::init_logging(cfg.quiet);
    print::banner(cfg.no_banner, cfg.quiet);

    let scan_cfg = commands.scan_config()?;
    let result = scan::scan(commands.sources(), scan_cfg, &cfg).await;

    if cfg.quiet == 0 {
        print::end_of_program();
    }
    result
}
