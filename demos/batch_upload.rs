//! Batch upload example
//!
//! Solves every FITS file given on the command line and writes a copy of each solved
//! file with the WCS solution merged into its primary header:
//! - Reading the API key from a file
//! - Uploading with a bounded number of open submissions
//! - Handling per-file failures without stopping the batch
//! - Merging the WCS header into the original image
//!
//! Usage: `cargo run --example batch_upload -- <key-file> <image.fits>...`

use astrometry_client::fits::FitsFile;
use astrometry_client::{ApiKey, Client, Config, Pollable, UploadSource};
use std::path::{Path, PathBuf};

fn is_fits(source: &UploadSource) -> bool {
    match source {
        UploadSource::File(path) => matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("fits" | "fit")
        ),
        UploadSource::Url(_) => false,
    }
}

fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{}.astrom.fits", stem))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(key_file) = args.next() else {
        eprintln!("usage: batch_upload <key-file> <image.fits>...");
        std::process::exit(2);
    };
    let files: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let key = ApiKey::from_file(Path::new(&key_file))?;

    let mut config = Config::default();
    config.settings.set("publicly_visible", "n")?;
    config.settings.set("allow_commercial_use", "n")?;

    let client = Client::connect(config, key).await?;

    let mut batch = client.upload_files(files, Some(3))?.with_filter(is_fits);

    let mut solved = 0;
    let mut failed = 0;
    while let Some(result) = batch.next_completed().await {
        let mut done = match result {
            Ok(done) => done,
            Err(e) => {
                println!("✗ {}", e);
                failed += 1;
                continue;
            }
        };

        if !done.job.success() {
            println!("✗ {}: could not be solved ({})", done.input, done.job);
            failed += 1;
            continue;
        }

        let UploadSource::File(path) = &done.input else {
            continue;
        };

        let wcs = done.job.wcs_file(false).await?;
        let mut image = FitsFile::open(path).await?;
        image.header.extend(&wcs);

        let output = output_path(path);
        tokio::fs::write(&output, image.to_bytes()).await?;

        let calibration = done.job.calibration(false).await?;
        println!(
            "✓ {} -> {} (ra={:.4}, dec={:.4}, {:.2}\"/px)",
            path.display(),
            output.display(),
            calibration.ra,
            calibration.dec,
            calibration.pixscale
        );
        solved += 1;
    }

    println!("\nSolved {} file(s), {} failed", solved, failed);
    Ok(())
}
