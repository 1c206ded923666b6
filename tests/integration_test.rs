use multidev_rs::prelude::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type KernelResult = std::result::Result<(), String>;

fn scheduler_on(provider: HostProvider, config: Config) -> Scheduler {
    let catalog = DeviceCatalog::new().with_provider(provider);
    Scheduler::from_catalog(&catalog, config).unwrap()
}

/// Provider whose `record` kernel logs every range it is launched with.
fn recording_provider(devices: usize) -> (HostProvider, Arc<Mutex<Vec<WorkRange>>>) {
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&ranges);
    let provider = HostProvider::with_devices(devices).register(
        "record",
        move |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            seen.lock().push(launch.range);
            Ok(())
        },
    );
    (provider, ranges)
}

fn doubling_kernel(launch: &HostLaunch<'_>, out: &mut [u8]) -> KernelResult {
    if launch.device.name().ends_with("#0") {
        thread::sleep(Duration::from_millis(30));
    }
    for (slot, item) in out.chunks_exact_mut(4).zip(launch.range.start..launch.range.end) {
        slot.copy_from_slice(&((item * 2) as u32).to_le_bytes());
    }
    Ok(())
}

#[test]
fn test_three_devices_four_parts() {
    let (provider, ranges) = recording_provider(3);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("record", "record").unwrap();

    let (sink, progress) = progress_channel();
    scheduler.set_progress_sink(sink);

    scheduler.invoke(0u64..100, 4).unwrap();

    let mut ranges = ranges.lock().clone();
    ranges.sort();
    assert_eq!(
        ranges,
        vec![
            WorkRange::new(0, 25),
            WorkRange::new(25, 50),
            WorkRange::new(50, 75),
            WorkRange::new(75, 100),
        ]
    );

    let events: Vec<f64> = progress.try_iter().collect();
    assert_eq!(events, vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(scheduler.phase(), Phase::Complete);
}

#[test]
fn test_offset_range_is_fully_covered() {
    let (provider, ranges) = recording_provider(2);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("record", "record").unwrap();

    scheduler.invoke(1_000u64..1_010, 3).unwrap();

    let mut ranges = ranges.lock().clone();
    ranges.sort();
    assert_eq!(ranges.first().map(|r| r.start), Some(1_000));
    assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
    assert_eq!(ranges.last().map(|r| r.end), Some(1_010));
    assert_eq!(ranges.len(), 4);
}

#[test]
fn test_progress_is_monotonic_and_ends_at_one() {
    let (provider, _) = recording_provider(4);
    let mut scheduler = scheduler_on(provider, Config::builder().chunks_per_device(8).build().unwrap());
    scheduler.set_kernel("record", "record").unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    scheduler.set_progress_sink(move |p: f64| sink_events.lock().push(p));

    scheduler.invoke_auto(0u64..10_240).unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 32);
    assert!(events.windows(2).all(|w| w[0] <= w[1]));
    assert!(events.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(events.last(), Some(&1.0));
}

#[test]
fn test_single_device_runs_whole_range() {
    let (provider, ranges) = recording_provider(1);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("record", "record").unwrap();

    let (sink, progress) = progress_channel();
    scheduler.set_progress_sink(sink);
    scheduler.invoke(0u64..100, 8).unwrap();

    assert_eq!(*ranges.lock(), vec![WorkRange::new(0, 100)]);
    assert_eq!(progress.try_iter().collect::<Vec<_>>(), vec![1.0]);
}

#[test]
fn test_one_part_uses_first_context() {
    let (provider, ranges) = recording_provider(3);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("record", "record").unwrap();

    scheduler.invoke(0u64..64, 1).unwrap();

    assert_eq!(*ranges.lock(), vec![WorkRange::new(0, 64)]);
    let loads = scheduler.metrics().per_device;
    assert_eq!(loads[0].chunks, 1);
    assert_eq!(loads[1].chunks + loads[2].chunks, 0);
}

#[test]
fn test_fast_device_steals_more_work() {
    let provider = HostProvider::with_devices(2).register(
        "uneven",
        |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            let delay = if launch.device.name().ends_with("#0") { 40 } else { 1 };
            thread::sleep(Duration::from_millis(delay));
            Ok(())
        },
    );
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("uneven", "uneven").unwrap();

    scheduler.invoke(0u64..2_000, 20).unwrap();

    let snapshot = scheduler.metrics();
    assert_eq!(snapshot.chunks_executed, 20);
    assert_eq!(snapshot.items_processed, 2_000);
    assert!(snapshot.per_device[1].chunks > snapshot.per_device[0].chunks);
}

#[test]
fn test_invoke_return_concatenates_in_context_order() {
    let provider = HostProvider::with_devices(3).register("double", doubling_kernel);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("double", "double").unwrap();

    let (sink, progress) = progress_channel();
    scheduler.set_progress_sink(sink);

    let out: Vec<u32> = scheduler.invoke_return(10, None, 1).unwrap();
    assert_eq!(out, (0..10).map(|i| i * 2).collect::<Vec<u32>>());

    let events: Vec<f64> = progress.try_iter().collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last(), Some(&1.0));
    assert!(events.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_invoke_return_fewer_items_than_contexts() {
    let provider = HostProvider::with_devices(4).register("double", doubling_kernel);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("double", "double").unwrap();

    let out: Vec<u32> = scheduler.invoke_return(2, None, 1).unwrap();
    assert_eq!(out, vec![0, 2]);
}

#[test]
fn test_invoke_return_rejects_short_buffer() {
    struct ShortContext(AcceleratorDevice);

    impl ComputeContext for ShortContext {
        fn device(&self) -> &AcceleratorDevice {
            &self.0
        }
        fn bind_kernel(&mut self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn bind_parameters(&mut self, _: &[KernelArg]) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _: WorkRange, _: Option<u64>) -> Result<()> {
            Ok(())
        }
        fn execute_return(&mut self, _: WorkRange, _: Option<u64>, len: usize) -> Result<Vec<u8>> {
            Ok(vec![0; len / 2])
        }
    }

    let device = AcceleratorDevice::new("short", "test", DeviceClass::Other);
    let contexts: Vec<Box<dyn ComputeContext>> = vec![Box::new(ShortContext(device))];
    let mut scheduler = Scheduler::new(contexts, Config::default()).unwrap();

    let err = scheduler.invoke_return::<u32>(8, None, 1).unwrap_err();
    assert!(matches!(err, Error::Execution { .. }));
}

#[test]
fn test_failing_chunk_aborts_after_draining() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let culprit = Arc::new(Mutex::new(None));
    let (s, f, c) = (Arc::clone(&started), Arc::clone(&finished), Arc::clone(&culprit));

    let provider = HostProvider::with_devices(3).register(
        "flaky",
        move |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            s.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            f.fetch_add(1, Ordering::SeqCst);
            if launch.range.contains(50) {
                *c.lock() = Some(launch.device.name().to_string());
                Err("out of resources".to_string())
            } else {
                Ok(())
            }
        },
    );
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("flaky", "flaky").unwrap();

    let (sink, progress) = progress_channel();
    scheduler.set_progress_sink(sink);

    let err = scheduler.invoke(0u64..100, 10).unwrap_err();
    assert!(err.is_execution());
    assert!(err.to_string().contains("out of resources"));

    assert_eq!(started.load(Ordering::SeqCst), finished.load(Ordering::SeqCst));
    assert!(finished.load(Ordering::SeqCst) < 10);
    assert!(progress.try_iter().all(|p| p < 1.0));
    assert_ne!(scheduler.phase(), Phase::Complete);
    assert_eq!(scheduler.metrics().chunks_failed, 1);

    let culprit = culprit.lock().clone().unwrap();
    let index = scheduler.devices().iter().position(|d| d.name() == culprit).unwrap();
    let loads = scheduler.metrics().per_device;
    assert_eq!(loads[index].failed, 1);
    assert_eq!(loads.iter().map(|d| d.failed).sum::<u64>(), 1);
}

#[test]
fn test_panicking_kernel_is_reported() {
    let provider = HostProvider::with_devices(2).register(
        "boom",
        |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            if launch.range.start == 0 {
                panic!("kernel exploded");
            }
            Ok(())
        },
    );
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("boom", "boom").unwrap();

    let err = scheduler.invoke(0u64..10, 2).unwrap_err();
    assert!(matches!(err, Error::WorkerPanic(_)));

    // the scheduler stays usable after a lane panicked
    assert!(scheduler.invoke(5u64..10, 2).is_ok());
}

#[test]
fn test_unknown_entry_point_is_compile_error() {
    let (provider, _) = recording_provider(2);
    let mut scheduler = scheduler_on(provider, Config::default());

    let err = scheduler.set_kernel("source", "Bruteforce").unwrap_err();
    assert!(matches!(err, Error::Compile { .. }));
}

#[test]
fn test_template_constants_reach_kernel() {
    let provider = HostProvider::new().register(
        "magic",
        |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            if launch.source.contains("const MAGIC = { 0xDE, 0xAD };") {
                Ok(())
            } else {
                Err(format!("unexpected source: {}", launch.source))
            }
        },
    );
    let mut scheduler = scheduler_on(provider, Config::default());

    let mut template = KernelTemplate::new("const MAGIC = { {{MAGIC}} };");
    template.replace_array("MAGIC", &[0xDE, 0xAD]);
    scheduler.set_template(template, "magic").unwrap();
    scheduler.invoke(0u64..4, 1).unwrap();

    let err = scheduler
        .set_template(KernelTemplate::new("{{MISSING}}"), "magic")
        .unwrap_err();
    assert!(matches!(err, Error::Compile { .. }));
}

#[test]
fn test_parameters_reach_every_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let provider = HostProvider::with_devices(2).register(
        "params",
        move |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            sink.lock().push(launch.args.to_vec());
            Ok(())
        },
    );
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("params", "params").unwrap();

    let params = SearchParams::new(7, 9, IncrementMode::BOTH);
    scheduler.set_parameters(&params.to_args()).unwrap();
    scheduler.invoke(0u64..10, 2).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|args| *args == params.to_args()));
}

#[test]
fn test_auto_local_size() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sizes);
    let provider = HostProvider::with_devices(2).register(
        "local",
        move |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            sink.lock().push(launch.local_size);
            Ok(())
        },
    );
    let config = Config::builder().local_size(LocalSize::Auto).build().unwrap();
    let mut scheduler = scheduler_on(provider, config);
    scheduler.set_kernel("local", "local").unwrap();

    scheduler.invoke(0u64..100, 2).unwrap();
    assert_eq!(*sizes.lock(), vec![128, 128]);
}

#[test]
fn test_gpu_filter_excludes_integrated() {
    let devices = vec![
        AcceleratorDevice::new("Intel(R) UHD Graphics 630", "Intel(R) Corporation", DeviceClass::Gpu)
            .with_max_work_group_size(256),
        AcceleratorDevice::new("GeForce GTX 1070", "NVIDIA Corporation", DeviceClass::Gpu)
            .with_max_work_group_size(1024),
        AcceleratorDevice::new("Intel(R) Core(TM) i7", "Intel(R) Corporation", DeviceClass::Cpu)
            .with_max_work_group_size(8192),
    ];
    let (provider, _) = recording_provider(1);
    let provider = provider.with_device_list(devices);

    let config = Config::builder().device_filter(DeviceFilter::GPU).build().unwrap();
    let scheduler = scheduler_on(provider, config);

    assert_eq!(scheduler.len(), 1);
    assert!(scheduler.has_nvidia());
    assert_eq!(scheduler.devices()[0].name(), "GeForce GTX 1070");
}

#[test]
fn test_config_can_keep_integrated_gpus() {
    let devices = vec![
        AcceleratorDevice::new("Intel(R) UHD Graphics 630", "Intel(R) Corporation", DeviceClass::Gpu),
        AcceleratorDevice::new("GeForce GTX 1070", "NVIDIA Corporation", DeviceClass::Gpu),
    ];
    let (provider, _) = recording_provider(1);
    let catalog = DeviceCatalog::new().with_provider(provider.with_device_list(devices));

    let config = Config::builder()
        .device_filter(DeviceFilter::GPU)
        .exclude_integrated(false)
        .build()
        .unwrap();
    let scheduler = Scheduler::from_catalog(&catalog, config).unwrap();

    let names: Vec<&str> = scheduler.devices().iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["Intel(R) UHD Graphics 630", "GeForce GTX 1070"]);
}

#[test]
fn test_inverted_range_is_rejected_before_dispatch() {
    let (provider, ranges) = recording_provider(2);
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("record", "record").unwrap();

    let (sink, progress) = progress_channel();
    scheduler.set_progress_sink(sink);

    let err = scheduler.invoke(10u64..5, 4).unwrap_err();
    assert!(err.is_config());
    assert!(ranges.lock().is_empty());
    assert_eq!(progress.try_iter().count(), 0);
    assert_eq!(scheduler.metrics().jobs_completed, 0);

    scheduler.invoke(5u64..10, 4).unwrap();
    assert_eq!(ranges.lock().len(), 5);
}

#[test]
fn test_lanes_are_reused_across_jobs() {
    let threads = Arc::new(Mutex::new(HashSet::new()));
    let seen = Arc::clone(&threads);
    let provider = HostProvider::with_devices(2).register(
        "where",
        move |_: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            seen.lock().insert(thread::current().id());
            Ok(())
        },
    );
    let mut scheduler = scheduler_on(provider, Config::default());
    scheduler.set_kernel("where", "where").unwrap();

    for job in 0..20u64 {
        scheduler.invoke(job * 10..(job + 1) * 10, 4).unwrap();
    }
    scheduler.invoke(0u64..10, 1).unwrap();
    let zeros: Vec<u32> = scheduler.invoke_return(8, None, 1).unwrap();
    assert_eq!(zeros, vec![0; 8]);

    let threads = threads.lock();
    assert_eq!(threads.len(), 2);
    assert!(!threads.contains(&thread::current().id()));
}

#[test]
fn test_no_matching_devices_is_config_error() {
    let catalog = DeviceCatalog::host();
    let config = Config::builder().device_filter(DeviceFilter::GPU).build().unwrap();

    let err = Scheduler::from_catalog(&catalog, config).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_keyspace_sweep_covers_total() {
    let covered = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&covered);
    let provider = HostProvider::with_devices(3).register(
        "sweep",
        move |launch: &HostLaunch<'_>, _: &mut [u8]| -> KernelResult {
            sink.fetch_add(launch.range.len() as usize, Ordering::SeqCst);
            Ok(())
        },
    );
    let mut scheduler = scheduler_on(provider, Config::builder().chunks_per_device(2).build().unwrap());
    scheduler.set_kernel("sweep", "sweep").unwrap();

    let params = SearchParams::new(0, 0, IncrementMode::LOWER);
    let mut sweep = KeyspaceSweep::new(1_000, params).with_pass_size(300).unwrap();
    let summary = sweep.run(&mut scheduler, |_| {}).unwrap();

    assert_eq!(summary.passes, 4);
    assert_eq!(summary.completed, 1_000);
    assert_eq!(covered.load(Ordering::SeqCst), 1_000);
    assert_eq!(sweep.params().current_offsets(), (1_000, 0));
    assert_eq!(scheduler.metrics().jobs_completed, 4);
}
