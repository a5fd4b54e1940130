use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use iboot_core::{Client, ClientConfig, ConnectionPolicy, Error, NusbBackend, SendOptions};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Apple Recovery/DFU USB client", long_about = None)]
struct Args {
    /// Only talk to the device with this ECID (hex)
    #[arg(long, value_parser = parse_hex_u64)]
    ecid: Option<u64>,

    /// Seconds to wait for a device before giving up
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for a device and print its identity
    Info,
    /// Upload a file to the device
    Send {
        file: PathBuf,
        /// Notify the device and reset it once the upload is done
        #[arg(long)]
        notify_finish: bool,
        /// Pair the finish notification with a zero-length request
        #[arg(long)]
        force_zlp: bool,
    },
    /// Send a console command (Recovery mode only)
    Command { command: String },
    /// Read an environment variable from the console
    Getenv { variable: String },
    /// Set an environment variable and persist it
    Setenv { variable: String, value: String },
    /// Reboot the device out of Recovery mode
    Reboot,
    /// Reset the USB connection
    Reset,
}

fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16)
}

fn wait_for_device(client: &mut Client<NusbBackend>, timeout: Duration) -> anyhow::Result<()> {
    info!("Waiting for a Recovery/DFU device...");
    let deadline = Instant::now() + timeout;
    loop {
        match client.poll() {
            Ok(()) => return Ok(()),
            Err(Error::NoDevice) => {
                if Instant::now() >= deadline {
                    bail!("no device appeared within {:?}", timeout);
                }
                thread::sleep(Duration::from_millis(250));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_info(client: &mut Client<NusbBackend>) -> anyhow::Result<()> {
    let mode = client.mode()?;
    let entry = client.device_entry();
    let Some(info) = client.device_info() else {
        bail!("device did not finalize");
    };

    println!("Mode:  {mode}");
    println!("CPID:  {:04x}", info.cpid);
    println!("CPRV:  {:02x}", info.cprv);
    println!("BDID:  {:02x}", info.bdid);
    println!("ECID:  {:016X}", info.ecid);
    if let Some(srtg) = &info.srtg {
        println!("SRTG:  {srtg}");
    }
    if let Some(srnm) = &info.srnm {
        println!("SRNM:  {srnm}");
    }
    if let Some(imei) = &info.imei {
        println!("IMEI:  {imei}");
    }
    if let Some(nonce) = &info.ap_nonce {
        println!("NONC:  {}", hex_string(nonce));
    }
    if let Some(nonce) = &info.sep_nonce {
        println!("SNON:  {}", hex_string(nonce));
    }
    if let Some(entry) = entry {
        println!("Model: {} ({})", entry.display_name, entry.product_type);
    }
    Ok(())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = ClientConfig {
        policy: ConnectionPolicy::AcceptAll,
        ecid_restriction: args.ecid.unwrap_or(0),
    };
    let mut client = Client::new(NusbBackend::new(), config);
    wait_for_device(&mut client, Duration::from_secs(args.timeout))?;

    match args.command {
        Command::Info => print_info(&mut client)?,
        Command::Send {
            file,
            notify_finish,
            force_zlp,
        } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            info!(file = %file.display(), len = data.len(), "Uploading");
            client.send_buffer(
                &data,
                SendOptions {
                    notify_finish,
                    force_zlp,
                },
            )?;
            println!("Uploaded {} bytes", data.len());
        }
        Command::Command { command } => {
            client.send_command(&command)?;
        }
        Command::Getenv { variable } => {
            let value = client.getenv(&variable)?;
            println!("{value}");
        }
        Command::Setenv { variable, value } => {
            client.setenv(&variable, &value)?;
            client.saveenv()?;
        }
        Command::Reboot => {
            client.reboot()?;
        }
        Command::Reset => {
            client.reset()?;
        }
    }

    Ok(())
}
