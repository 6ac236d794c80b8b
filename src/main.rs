#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};

use at89s_isp_loader::image::MemoryImage;
use at89s_isp_loader::{device, fit, Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
#[structopt(
    name = "at89s-isp-loader",
    about = "Serial programmer for the AT89Sxx series of microcontrollers"
)]
pub struct Args {
    /// Intel HEX file to send
    #[structopt(parse(from_os_str))]
    file: PathBuf,

    /// Serial port the bridge is attached to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Target model from the supported list
    #[structopt(long, default_value = "AT89S51")]
    target: String,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let args = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(args.log_level, Config::default());

    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let image = MemoryImage::parse(&text)
        .with_context(|| format!("parsing {}", args.file.display()))?;

    let profile = device::lookup(&args.target)?;

    report_file(&args.file, &image);
    info!(
        "Target: {} (RAM: {}, ROM: {})",
        profile.name,
        bytefmt::format(u64::from(profile.ram_bytes)),
        bytefmt::format(u64::from(profile.rom_bytes)),
    );

    let verdict = fit::evaluate(image.byte_count(), profile);
    info!("ROM usage: {:.2}% ({})", verdict.percent, verdict.tier);

    if !verdict.fits() {
        anyhow::bail!(
            "program is too large: {} bytes exceed the {} byte ROM of the {}",
            image.byte_count(),
            profile.rom_bytes,
            profile.name,
        );
    }

    info!("Connecting to bridge on {}", args.port);
    let mut programmer = Programmer::linux(&args.port, args.baud, args.options.clone())?;

    // Ctrl-C flags cancellation; the session releases the target first
    let cancel = programmer.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel())?;

    info!("Sending {}", args.file.display());

    let total = image.byte_count() as u64;
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} B")
            .progress_chars("=>-"),
    );

    let result = programmer.program(&image, |fraction| {
        bar.set_position((fraction * total as f32) as u64);
    });
    bar.finish();
    result?;

    info!("Done, target released");

    Ok(())
}

fn report_file(path: &Path, image: &MemoryImage) {
    let size = bytefmt::format(image.byte_count() as u64);

    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .map(|t| {
                    DateTime::<Local>::from(t)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                })
                .unwrap_or_else(|_| "unknown".to_string());
            info!(
                "File: {} ({}), modified {}, owner {}",
                path.display(),
                size,
                modified,
                owner_name(&meta),
            );
        }
        Err(e) => info!(
            "File: {} ({}), metadata unavailable: {}",
            path.display(),
            size,
            e
        ),
    }
}

#[cfg(unix)]
fn owner_name(meta: &fs::Metadata) -> String {
    use std::ffi::CStr;
    use std::os::unix::fs::MetadataExt;

    let uid = meta.uid();
    // getpwuid hands back a buffer owned by libc, valid until the next call
    unsafe {
        let pw = libc::getpwuid(uid);
        if pw.is_null() {
            return uid.to_string();
        }
        CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned()
    }
}

#[cfg(not(unix))]
fn owner_name(_meta: &fs::Metadata) -> String {
    "unknown".to_string()
}
