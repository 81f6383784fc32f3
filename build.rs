//! Build script rendering the `hwsvc` manual pages.
//!
//! Writes `hwsvc.1` for the top-level command and one `hwsvc-<command>.1`
//! page per subcommand into `OUT_DIR`.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(man: &Man, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    fs::write(target, buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    render(&Man::new(command.clone()), &out_dir.join("hwsvc.1"))?;
    for subcommand in command.get_subcommands() {
        let page = format!("hwsvc-{}", subcommand.get_name());
        let man = Man::new(subcommand.clone()).title(page.clone());
        render(&man, &out_dir.join(format!("{page}.1")))?;
    }

    Ok(())
}
