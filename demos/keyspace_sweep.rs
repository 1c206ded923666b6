//! Walk a keyspace on every host core looking for a key whose mixed value
//! matches a target, then read back a small table with `invoke_return`.
//!
//! Run with `RUST_LOG=multidev_rs=debug cargo run --example keyspace_sweep`.

use multidev_rs::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

const TARGET_KEY: u64 = 0x0000_0000_0123_4567;

fn mix(key: u64) -> u64 {
    let mut x = key ^ 0x9E37_79B9_7F4A_7C15;
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Pull the target out of the rendered `const TARGET: u64 = ...;` line.
fn target_from_source(source: &str) -> Option<u64> {
    let line = source.lines().find(|l| l.contains("TARGET"))?;
    let value = line.split('=').nth(1)?.trim().trim_end_matches(';');
    value.parse().ok()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let found = Arc::new(Mutex::new(Vec::new()));
    let hits = Arc::clone(&found);

    let provider = HostProvider::with_devices(num_cpus::get().max(2))
        .register("Bruteforce", move |launch: &HostLaunch<'_>, _: &mut [u8]| -> std::result::Result<(), String> {
            let target = target_from_source(launch.source).ok_or("no TARGET constant")?;
            let (lower, completed) = match launch.args {
                [KernelArg::U64(lower), _, _, KernelArg::U64(completed), ..] => (*lower, *completed),
                other => return Err(format!("unexpected arguments {:?}", other)),
            };

            for item in launch.range.start..launch.range.end {
                let key = lower.wrapping_add(completed).wrapping_add(item);
                if mix(key) == target {
                    hits.lock().push(key);
                }
            }
            Ok(())
        })
        .register("Table", |launch: &HostLaunch<'_>, out: &mut [u8]| -> std::result::Result<(), String> {
            for (slot, item) in out.chunks_exact_mut(8).zip(launch.range.start..launch.range.end) {
                slot.copy_from_slice(&mix(item).to_le_bytes());
            }
            Ok(())
        });

    let catalog = DeviceCatalog::new().with_provider(provider);
    let config = Config::builder()
        .device_filter(DeviceFilter::CPU)
        .chunks_per_device(4)
        .build()?;
    let mut scheduler = Scheduler::from_catalog(&catalog, config)?;

    for device in scheduler.devices() {
        println!("device: {}", device);
    }

    let mut template = KernelTemplate::new("const TARGET: u64 = {{TARGET}};\nkernel Bruteforce");
    template.replace("TARGET", mix(TARGET_KEY));
    scheduler.set_template(template, "Bruteforce")?;

    let params = SearchParams::new(0, 0, IncrementMode::LOWER);
    let mut sweep = KeyspaceSweep::new(1 << 26, params).with_pass_size(1 << 24)?;
    let summary = sweep.run(&mut scheduler, |report| {
        let (lower, upper) = (report.lower, report.upper);
        println!(
            "pass {}/{}: {} completed in {:.2?} (lower {} upper {})",
            report.index + 1,
            report.passes,
            report.completed,
            report.elapsed,
            lower,
            upper
        );
    })?;

    println!(
        "swept {} keys in {} passes ({:.2?})",
        summary.completed, summary.passes, summary.elapsed
    );
    println!("matches: {:x?}", &*found.lock());

    scheduler.set_kernel("table", "Table")?;
    let table: Vec<u64> = scheduler.invoke_return(8, None, 1)?;
    for (key, value) in table.iter().enumerate() {
        println!("mix({}) = {:#018x}", key, value);
    }

    let snapshot = scheduler.metrics();
    println!(
        "{} chunks, {:.0} keys/s of device time, shares {:?}",
        snapshot.chunks_executed,
        snapshot.items_per_second(),
        snapshot.device_shares()
    );

    Ok(())
}
