/*
 *  main.rs
 *
 *  RVExt - extension test bench
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result, anyhow};
use env_logger::Env;
use log::info;

use rvext::config::{self, Command, Config};
use rvext::extension::{Extension, machine};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

fn main() -> Result<()> {
    let (cli, cfg) = config::load().context("loading configuration")?;

    if cli.dump_config {
        print!("{}", config::dump(&cfg)?);
        return Ok(());
    }

    // RUST_LOG still wins over the configured level
    let level = cfg.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    info!("{} v.{} built {} for {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_TARGET);

    let command = cli.command.clone().unwrap_or(Command::Version);
    match command {
        Command::Machine { path } => {
            let path = match path {
                Some(path) => path,
                None => extension_path(&cfg)?,
            };
            let image = machine::probe(&path)
                .with_context(|| format!("reading header of {}", path.display()))?;
            println!(
                "{}: {} {} ({})",
                path.display(),
                image.format,
                image.machine,
                image.pointer_width.map_or_else(|| "width unknown".to_string(), |w| format!("{}-bit", w)),
            );
        }
        Command::Version => {
            let ext = open(&cfg)?;
            let (version, elapsed) = ext.timed_version()?;
            println!("{}", version);
            report(&cfg, "RVExtensionVersion", elapsed);
            ext.dispose()?;
        }
        Command::Call { input } => {
            let ext = open(&cfg)?;
            let (output, elapsed) = ext.timed_call(&input)?;
            println!("{}", output);
            report(&cfg, "RVExtension", elapsed);
            ext.dispose()?;
        }
        Command::Args { function, args } => {
            let ext = open(&cfg)?;
            let (output, status, elapsed) = ext.timed_call_args_status(&function, args.as_slice())?;
            println!("{}", output);
            println!("status: {}", status);
            report(&cfg, "RVExtensionArgs", elapsed);
            ext.dispose()?;
        }
        Command::Listen { call, .. } => {
            let ext = open(&cfg)?;
            let elapsed = ext.timed_register_callback(|name, function, data| {
                info!("callback {} {} {}", name, function, data);
                println!("{}\t{}\t{}", name, function, data);
                0
            })?;
            report(&cfg, "RVExtensionRegisterCallback", elapsed);

            if let Some(input) = call {
                let (output, elapsed) = ext.timed_call(&input)?;
                println!("{}", output);
                report(&cfg, "RVExtension", elapsed);
            }

            let secs = cfg.listen_secs();
            info!("Listening for callbacks for {}s", secs);
            std::thread::sleep(Duration::from_secs(secs));
            ext.dispose()?;
        }
    }

    Ok(())
}

fn extension_path(cfg: &Config) -> Result<PathBuf> {
    cfg.extension.clone()
        .ok_or_else(|| anyhow!("no extension given; use --extension or set `extension` in the config"))
}

fn open(cfg: &Config) -> Result<Extension> {
    let path = extension_path(cfg)?;
    Extension::open(&path).with_context(|| format!("opening {}", path.display()))
}

fn report(cfg: &Config, entry: &str, elapsed: Duration) {
    if cfg.timed() {
        println!("{} took {:?}", entry, elapsed);
    }
}
