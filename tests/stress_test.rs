//! Stress tests for the scheduler

use multidev_rs::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn counting_scheduler(devices: usize, config: Config) -> (Scheduler, Arc<AtomicU64>) {
    let items = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&items);
    let provider = HostProvider::with_devices(devices).register(
        "count",
        move |launch: &HostLaunch<'_>, _: &mut [u8]| -> std::result::Result<(), String> {
            sink.fetch_add(launch.range.len(), Ordering::Relaxed);
            Ok(())
        },
    );
    let catalog = DeviceCatalog::new().with_provider(provider);
    let mut scheduler = Scheduler::from_catalog(&catalog, config).unwrap();
    scheduler.set_kernel("count", "count").unwrap();
    (scheduler, items)
}

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_chunks() {
    let config = Config::builder().chunks_per_device(4096).build().unwrap();
    let (mut scheduler, items) = counting_scheduler(8, config);

    let start = Instant::now();
    scheduler.invoke_auto(0u64..10_000_000).unwrap();
    println!("32k chunks over 8 lanes: {:?}", start.elapsed());

    assert_eq!(items.load(Ordering::Relaxed), 10_000_000);
    assert_eq!(scheduler.metrics().chunks_executed, 8 * 4096 + 1);
}

#[test]
#[ignore]
fn stress_test_repeated_jobs() {
    let (mut scheduler, items) = counting_scheduler(4, Config::default());

    for job in 0..1_000u64 {
        scheduler.invoke(job * 100..(job + 1) * 100, 7).unwrap();
    }

    assert_eq!(items.load(Ordering::Relaxed), 100_000);
    assert_eq!(scheduler.metrics().jobs_completed, 1_000);
}

#[test]
#[ignore]
fn stress_test_full_u32_pass() {
    let config = Config::builder().chunks_per_device(64).build().unwrap();
    let (mut scheduler, items) = counting_scheduler(num_cpus::get().max(2), config);

    let params = SearchParams::new(0, 0, IncrementMode::LOWER);
    let mut sweep = KeyspaceSweep::new(2 * u64::from(u32::MAX) + 5, params);
    let summary = sweep.run(&mut scheduler, |report| {
        println!("pass {}/{} at {}", report.index + 1, report.passes, report.completed);
    })
    .unwrap();

    assert_eq!(summary.passes, 3);
    assert_eq!(items.load(Ordering::Relaxed), 2 * u64::from(u32::MAX) + 5);
}
