//! Background logging demo
//!
//! Emulates a training loop that logs a metric, an image, and a large
//! artifact every epoch, then saves the best model.
//!
//! ```bash
//! cargo run --release --example background_logging              # inline logging
//! cargo run --release --example background_logging -- --background
//! ```
//!
//! With `--background` the metric is logged on a thread and the heavy
//! artifacts in worker processes (this binary re-executed), so the loop only
//! waits when the previous epoch's upload under the same name is unfinished.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use trueno_tracker::dispatch::{worker, ImageData, Isolation, LogCall};
use trueno_tracker::{ActiveRun, RunOptions, TrackerConfig};

const EPOCHS: u64 = 10;
const HUGE_FILE: &str = "artifact_test.deleteme";
const HUGE_FILE_MIB: usize = 256;

/// Deterministic stand-in for a training step.
struct Epoch {
    loss: f64,
    image: ImageData,
    model: Vec<u8>,
}

fn do_cool_stuff(epoch: u64, time_spent: Duration) -> Result<Epoch> {
    let started = Instant::now();
    let seed = epoch.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    #[allow(clippy::cast_precision_loss)]
    let loss = (seed % 1000) as f64 / 1000.0;

    let (width, height) = (640u32, 480u32);
    let pixels = (0..width * height)
        .map(|i| (u64::from(i) ^ seed).to_le_bytes()[0])
        .collect();
    let image = ImageData::new(width, height, 1, pixels)?;
    let model = seed.to_le_bytes().repeat(100 * 100 * 100 * 2 / 8);

    if let Some(rest) = time_spent.checked_sub(started.elapsed()) {
        println!(
            "Sleeping for {:.3}s to emulate time spent by the model doing cool stuff...",
            rest.as_secs_f64()
        );
        std::thread::sleep(rest);
    }
    Ok(Epoch { loss, image, model })
}

fn create_huge_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    println!("Creating a huge file called {}...", path.display());
    let mut file = File::create(path)?;
    let chunk = vec![0u8; 1024 * 1024];
    for _ in 0..HUGE_FILE_MIB {
        file.write_all(&chunk)?;
    }
    Ok(())
}

fn log_epoch(run: &mut ActiveRun, epoch: u64, state: &Epoch, background: bool) -> Result<()> {
    let metric = LogCall::metric("cool_loss", state.loss, epoch);
    let image = LogCall::image("cool_image.pgm", state.image.clone());
    let artifact = LogCall::artifact(HUGE_FILE);
    if background {
        run.submit("cool_loss", metric, Isolation::Thread)?;
        run.submit("cool_image", image, Isolation::Process)?;
        run.submit("huge_cool_file", artifact, Isolation::Process)?;
    } else {
        run.log(&metric)?;
        run.log(&image)?;
        run.log(&artifact)?;
    }
    Ok(())
}

fn train(background: bool) -> Result<()> {
    create_huge_file(Path::new(HUGE_FILE))?;

    let tracker = TrackerConfig::builder()
        .experiment_name("Cool Experiment")
        .open()?;

    let (run_name, description) = if background {
        ("BackgroundLogger", "Using Background Logger")
    } else {
        ("DefaultLogger", "Using Default Logger")
    };

    let mut logging = Duration::ZERO;
    tracker.run(
        RunOptions::named(run_name).description(description),
        |run| -> Result<()> {
            let mut best: Option<Epoch> = None;
            for epoch in 0..EPOCHS {
                println!("Epoch #{epoch}");
                let state = do_cool_stuff(epoch, Duration::from_secs(1))?;

                let started = Instant::now();
                log_epoch(run, epoch, &state, background)?;
                logging += started.elapsed();

                if best.as_ref().map_or(true, |b| state.loss < b.loss) {
                    best = Some(state);
                }
            }

            println!("Saving model...");
            let started = Instant::now();
            if let Some(best) = best {
                let call = LogCall::model("best_model", "raw-f16", best.model);
                if background {
                    run.submit("best_model", call, Isolation::Process)?;
                } else {
                    run.log(&call)?;
                }
            }
            logging += started.elapsed();
            Ok(())
        },
    )?;

    println!("Total time spent with logging: {:.3}s", logging.as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    worker::serve_if_worker();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let background = std::env::args().any(|arg| arg == "--background");
    if background {
        println!("Using background logger!");
    }

    let result = train(background);
    let _ = std::fs::remove_file(HUGE_FILE);
    result
}
