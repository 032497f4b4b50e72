use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::info;

use ember::{Config, Engine, ErrorChannel, Imports, Value};

/// Instantiate a WebAssembly module and call one of its exports
#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// Module to load, binary (.wasm) or text (.wat)
    file: PathBuf,

    /// Export to call
    #[clap(long, default_value = "throw_wasm_error")]
    invoke: String,

    /// Arguments for the export, parsed against its parameter types
    #[clap(allow_hyphen_values = true)]
    args: Vec<String>,

    /// Wasm call frames allowed before a call traps
    #[clap(long, default_value_t = ember::config::DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,

    /// Ceiling in 64KiB pages for linear memory
    #[clap(long)]
    max_memory_pages: Option<u32>,

    /// Succeed only if the call fails
    #[clap(long)]
    expect_failure: bool,
}

fn read_module(path: &PathBuf) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("couldn't read {}", path.display()))?;
    if path.extension().map_or(false, |ext| ext == "wat") {
        return wat::parse_bytes(&bytes)
            .map(|bytes| bytes.into_owned())
            .with_context(|| format!("couldn't assemble {}", path.display()));
    }
    Ok(bytes)
}

/// Print the last recorded error the way the C client does
fn print_last_error() {
    let mut buffer = vec![0u8; ErrorChannel::with_current(ErrorChannel::length)];
    let written = ErrorChannel::with_current(|channel| channel.copy_into(&mut buffer));
    println!("Error: `{}`", String::from_utf8_lossy(&buffer[..written]));
}

fn run(args: &Args) -> Result<bool> {
    let bytes = read_module(&args.file)?;

    let mut config = Config::default().max_call_depth(args.max_call_depth);
    if let Some(pages) = args.max_memory_pages {
        config = config.max_memory_pages(pages);
    }

    let engine = Engine::with_config(config);
    let mut instance = match engine.instantiate(&bytes, Imports::new()) {
        Ok(instance) => instance,
        Err(_) => {
            print_last_error();
            bail!("instantiation failed");
        }
    };

    let params = match instance.export_signature(&args.invoke) {
        Ok(ty) => ty.parameters.clone(),
        // a missing export is a usage error, not the failure --expect-failure waits for
        Err(error) => {
            ErrorChannel::with_current(|channel| channel.record_error(&error));
            print_last_error();
            bail!("{} is not a callable export", args.invoke);
        }
    };
    if params.len() != args.args.len() {
        bail!(
            "{} takes {} arguments, {} given",
            args.invoke,
            params.len(),
            args.args.len()
        );
    }
    let values = params
        .iter()
        .zip(&args.args)
        .map(|(ty, text)| Value::parse(*ty, text).map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<Value>>>()?;

    info!("calling {}", args.invoke);
    let succeeded = match instance.invoke(&args.invoke, &values) {
        Ok(results) => {
            for result in results {
                println!("{result}");
            }
            true
        }
        Err(_) => {
            if args.expect_failure {
                println!("The guest function \"{}\" failed as expected", args.invoke);
            }
            print_last_error();
            false
        }
    };
    instance.destroy();
    Ok(succeeded)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(succeeded) if succeeded != args.expect_failure => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("{error:#}");
            ExitCode::FAILURE
        }
    }
}
