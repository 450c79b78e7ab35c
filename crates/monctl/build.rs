//! Build script: render the `monctl(1)` manual page from the clap definition
//! into target/generated-man/<target>/<profile> for release packaging.

use clap::CommandFactory;
use clap_mangen::Man;
use monctl_build_util::{man_page_dir, manual_date_from_env, write_man_page};
use std::{env, path::PathBuf};

#[path = "src/cli.rs"]
#[expect(dead_code, reason = "only the clap definition is needed to render the page")]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    for variable in [
        "CARGO_PKG_VERSION",
        "CARGO_BIN_NAME",
        "SOURCE_DATE_EPOCH",
        "TARGET",
        "PROFILE",
    ] {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    let cmd = cli::Cli::command();
    let binary_name = env::var("CARGO_BIN_NAME").unwrap_or_else(|_| cmd.get_name().to_owned());
    let version = env::var("CARGO_PKG_VERSION")
        .map_err(|_| "CARGO_PKG_VERSION must be set by Cargo to render the manual page")?;

    let mut warnings = Vec::new();
    let date = manual_date_from_env(&mut warnings);
    for warning in warnings {
        println!("cargo:warning={warning}");
    }

    let mut page = Vec::new();
    Man::new(cmd)
        .section("1")
        .source(format!("{binary_name} {version}"))
        .date(date)
        .render(&mut page)?;
    let page_name = format!("{binary_name}.1");

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown-target".into());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown-profile".into());
    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from);
    let dir = man_page_dir(&target, &profile, out_dir.as_deref());
    write_man_page(&page, &dir, &page_name)?;

    if let Some(extra_dir) = out_dir
        && let Err(err) = write_man_page(&page, &extra_dir, &page_name)
    {
        println!(
            "cargo:warning=Failed to stage manual page in OUT_DIR ({}): {err}",
            extra_dir.display()
        );
    }

    Ok(())
}
