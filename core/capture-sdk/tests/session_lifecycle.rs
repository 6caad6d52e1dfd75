use capture_sdk::{
    AttachmentState, CaptureConfig, CaptureError, CaptureEvent, CaptureListener,
    CaptureServices, ControllerConfig, DiskConsumption, ErrorInfo, GeoLocation,
    IsRunningCallback, ProbeOutcome, SensorBatch, SessionController, VehicleMode,
};
use capture_worker::{
    CapturingIndicator, LocationSource, MemoryStore, SourceError, SourceHandle, WorkerServices,
};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Forwards every callback as a `CaptureEvent` so tests can wait on them.
struct RecordingListener {
    events: Sender<CaptureEvent>,
}

impl RecordingListener {
    fn new() -> (Arc<Self>, Receiver<CaptureEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        (Arc::new(Self { events }), receiver)
    }

    fn record(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }
}

impl CaptureListener for RecordingListener {
    fn on_fix_acquired(&self) {
        self.record(CaptureEvent::FixAcquired);
    }
    fn on_fix_lost(&self) {
        self.record(CaptureEvent::FixLost);
    }
    fn on_new_geo_location_acquired(&self, location: &GeoLocation) {
        self.record(CaptureEvent::GeoLocationAcquired(location.clone()));
    }
    fn on_new_sensor_data_acquired(&self, batch: &SensorBatch) {
        self.record(CaptureEvent::SensorDataAcquired(batch.clone()));
    }
    fn on_low_disk_space(&self, consumption: &DiskConsumption) {
        self.record(CaptureEvent::LowDiskSpace(*consumption));
    }
    fn on_synchronization_successful(&self) {
        self.record(CaptureEvent::SynchronizationSuccessful);
    }
    fn on_error_state(&self, error: &ErrorInfo) {
        self.record(CaptureEvent::ErrorState(error.clone()));
    }
}

#[derive(Default)]
struct RecordingCallback {
    running: AtomicUsize,
    timed_out: AtomicUsize,
}

impl RecordingCallback {
    fn counts(&self) -> (usize, usize) {
        (
            self.running.load(Ordering::SeqCst),
            self.timed_out.load(Ordering::SeqCst),
        )
    }
}

impl IsRunningCallback for RecordingCallback {
    fn is_running(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    fn timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::SeqCst);
    }
}

/// Location source driven by the test through the handle the worker hands it.
#[derive(Clone, Default)]
struct ManualSource {
    handle: Arc<Mutex<Option<SourceHandle>>>,
}

impl ManualSource {
    fn handle(&self) -> SourceHandle {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(handle) = self.handle.lock().unwrap().clone() {
                return handle;
            }
            assert!(Instant::now() < deadline, "source never subscribed");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl LocationSource for ManualSource {
    fn subscribe(&mut self, handle: SourceHandle) -> Result<(), SourceError> {
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.handle.lock().unwrap().take();
    }
}

struct BrokenSource;

impl LocationSource for BrokenSource {
    fn subscribe(&mut self, _handle: SourceHandle) -> Result<(), SourceError> {
        Err(SourceError::Unavailable("location services disabled".to_string()))
    }

    fn unsubscribe(&mut self) {}
}

/// Indicator whose `show` and `hide` take a while, like a slow UI thread.
struct SlowIndicator {
    show_delay: Duration,
    hide_delay: Duration,
    hiding: Sender<()>,
    hidden: AtomicBool,
}

impl SlowIndicator {
    fn new(show_delay: Duration, hide_delay: Duration) -> (Arc<Self>, Receiver<()>) {
        let (hiding, started) = crossbeam_channel::unbounded();
        let indicator = Arc::new(Self {
            show_delay,
            hide_delay,
            hiding,
            hidden: AtomicBool::new(false),
        });
        (indicator, started)
    }
}

impl CapturingIndicator for SlowIndicator {
    fn show(&self, _vehicle: VehicleMode) {
        thread::sleep(self.show_delay);
    }

    fn hide(&self) {
        let _ = self.hiding.send(());
        thread::sleep(self.hide_delay);
        self.hidden.store(true, Ordering::SeqCst);
    }
}

fn controller_with_indicator(
    indicator: Arc<SlowIndicator>,
    config: CaptureConfig,
) -> SessionController {
    let services = CaptureServices::new(|| Box::new(ManualSource::default()) as Box<dyn LocationSource>)
        .with_worker_services(WorkerServices {
            indicator,
            ..WorkerServices::default()
        });
    SessionController::new(config, services)
}

fn controller_with(source: ManualSource, store: Arc<MemoryStore>) -> SessionController {
    let services = CaptureServices::new(move || Box::new(source.clone()) as Box<dyn LocationSource>)
        .with_worker_services(WorkerServices {
            store,
            ..WorkerServices::default()
        });
    SessionController::new(CaptureConfig::default(), services)
}

fn controller() -> SessionController {
    controller_with(ManualSource::default(), Arc::new(MemoryStore::new()))
}

fn location(latitude: f64) -> GeoLocation {
    GeoLocation {
        latitude,
        longitude: 13.4,
        timestamp_ms: 1_700_000_000_000,
        speed: 4.2,
        accuracy: 6.0,
    }
}

fn assert_running(controller: &SessionController) {
    let callback = RecordingCallback::default();
    controller.is_running(PROBE_TIMEOUT, &callback);
    assert_eq!(callback.counts(), (1, 0));
}

fn assert_timed_out(controller: &SessionController) {
    let callback = RecordingCallback::default();
    controller.is_running(PROBE_TIMEOUT, &callback);
    assert_eq!(callback.counts(), (0, 1));
}

#[test]
fn test_start_then_stop_then_is_running_times_out() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();

    controller.start(listener, VehicleMode::Bicycle).unwrap();
    assert_running(&controller);

    controller.stop().unwrap();
    assert!(controller.session().is_none());
    assert_timed_out(&controller);
}

#[test]
fn test_start_twice_keeps_one_session() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();

    let first = controller
        .start(listener.clone(), VehicleMode::Car)
        .unwrap();
    let second = controller.start(listener, VehicleMode::Bus).unwrap();

    assert_eq!(first, second);
    assert_eq!(controller.session(), Some(first));
    assert_eq!(
        controller.attachment_state(),
        Some(AttachmentState::Attached)
    );
    controller.stop().unwrap();
}

#[test]
fn test_concurrent_starts_share_one_session() {
    let controller = Arc::new(controller());
    let (listener, _events) = RecordingListener::new();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let listener = listener.clone();
            thread::spawn(move || controller.start(listener, VehicleMode::Train).unwrap())
        })
        .collect();
    let sessions: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert!(sessions.windows(2).all(|pair| pair[0] == pair[1]));
    controller.stop().unwrap();
    assert!(controller.stop().unwrap_err().is_not_connected());
}

#[test]
fn test_stop_without_start_is_not_connected() {
    let controller = controller();
    let err = controller.stop().unwrap_err();
    assert!(err.is_not_connected());
}

#[test]
fn test_stop_while_detached_is_not_connected() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Walking).unwrap();
    controller.disconnect().unwrap();

    let err = controller.stop().unwrap_err();
    assert!(err.is_not_connected());

    // The session survives the rejected stop.
    assert_eq!(
        controller.attachment_state(),
        Some(AttachmentState::Detached)
    );
    assert_running(&controller);
    controller.reconnect().unwrap();
    controller.stop().unwrap();
}

#[test]
fn test_disconnect_twice_second_is_not_connected() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Car).unwrap();

    controller.disconnect().unwrap();
    let err = controller.disconnect().unwrap_err();
    assert!(err.is_not_connected());

    controller.reconnect().unwrap();
    controller.stop().unwrap();
}

#[test]
fn test_disconnect_without_session_is_not_connected() {
    let controller = controller();
    assert!(controller.disconnect().unwrap_err().is_not_connected());
}

#[test]
fn test_reconnect_twice_never_fails() {
    let controller = controller();
    controller.reconnect().unwrap();
    controller.reconnect().unwrap();
    assert!(controller.session().is_none());

    let (listener, _events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Motorbike).unwrap();
    controller.disconnect().unwrap();
    controller.reconnect().unwrap();
    controller.reconnect().unwrap();

    assert_eq!(
        controller.attachment_state(),
        Some(AttachmentState::Attached)
    );
    controller.stop().unwrap();
}

#[test]
fn test_disconnect_reconnect_then_is_running() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();
    let session = controller.start(listener, VehicleMode::Bicycle).unwrap();

    controller.disconnect().unwrap();
    controller.reconnect().unwrap();

    assert_running(&controller);
    assert_eq!(controller.session(), Some(session));
    controller.stop().unwrap();
}

#[test]
fn test_is_running_while_detached() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Car).unwrap();
    controller.disconnect().unwrap();

    assert_eq!(controller.probe(PROBE_TIMEOUT), ProbeOutcome::Running);

    controller.reconnect().unwrap();
    controller.stop().unwrap();
}

#[test]
fn test_is_running_without_session_does_not_wait() {
    let controller = controller();
    let started = Instant::now();
    assert_timed_out(&controller);
    assert!(started.elapsed() < PROBE_TIMEOUT);
}

#[test]
fn test_start_while_detached_is_not_connected() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();
    let session = controller
        .start(listener.clone(), VehicleMode::Car)
        .unwrap();
    controller.disconnect().unwrap();

    let err = controller.start(listener, VehicleMode::Car).unwrap_err();
    assert!(err.is_not_connected());
    assert_eq!(controller.session(), Some(session));

    controller.reconnect().unwrap();
    controller.stop().unwrap();
}

#[test]
fn test_restart_after_stop_creates_new_session() {
    let controller = controller();
    let (listener, _events) = RecordingListener::new();

    let first = controller
        .start(listener.clone(), VehicleMode::Bicycle)
        .unwrap();
    controller.stop().unwrap();
    let second = controller.start(listener, VehicleMode::Bicycle).unwrap();

    assert_ne!(first, second);
    assert_running(&controller);
    controller.stop().unwrap();
}

#[test]
fn test_detached_listener_misses_events_while_sampling_continues() {
    let source = ManualSource::default();
    let store = Arc::new(MemoryStore::new());
    let controller = controller_with(source.clone(), store.clone());
    let (listener, events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Bicycle).unwrap();

    let handle = source.handle();
    handle.on_update(location(52.50));
    assert!(matches!(
        events.recv_timeout(WAIT).unwrap(),
        CaptureEvent::GeoLocationAcquired(_)
    ));

    controller.disconnect().unwrap();
    handle.on_update(location(52.51));

    let deadline = Instant::now() + WAIT;
    while store.locations().len() < 2 {
        assert!(Instant::now() < deadline, "worker stopped sampling");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

    controller.reconnect().unwrap();
    // The probe's pong follows the attach through the worker's command queue.
    assert_running(&controller);
    handle.on_update(location(52.52));
    match events.recv_timeout(WAIT).unwrap() {
        CaptureEvent::GeoLocationAcquired(received) => assert_eq!(received.latitude, 52.52),
        other => panic!("unexpected event {:?}", other),
    }
    controller.stop().unwrap();
}

#[test]
fn test_synchronization_success_reaches_listener() {
    let controller = controller();
    let (listener, events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Car).unwrap();

    controller.report_synchronization_successful().unwrap();

    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        CaptureEvent::SynchronizationSuccessful
    );
    controller.stop().unwrap();
}

#[test]
fn test_source_failure_reaches_listener_as_error_state() {
    let services = CaptureServices::new(|| Box::new(BrokenSource) as Box<dyn LocationSource>);
    let controller = SessionController::new(CaptureConfig::default(), services);
    let (listener, events) = RecordingListener::new();

    controller.start(listener, VehicleMode::Unknown).unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        CaptureEvent::ErrorState(info) => {
            assert_eq!(info.code, capture_protocol::ERROR_SOURCE_FAILURE)
        }
        other => panic!("unexpected event {:?}", other),
    }
    // A worker without a source still answers probes.
    assert_running(&controller);
    controller.stop().unwrap();
}

#[test]
fn test_panicking_listener_does_not_break_session() {
    struct PanickingListener;

    impl CaptureListener for PanickingListener {
        fn on_fix_acquired(&self) {}
        fn on_fix_lost(&self) {}
        fn on_new_geo_location_acquired(&self, _location: &GeoLocation) {
            panic!("listener bug");
        }
        fn on_new_sensor_data_acquired(&self, _batch: &SensorBatch) {}
        fn on_low_disk_space(&self, _consumption: &DiskConsumption) {}
        fn on_synchronization_successful(&self) {}
        fn on_error_state(&self, _error: &ErrorInfo) {}
    }

    let source = ManualSource::default();
    let controller = controller_with(source.clone(), Arc::new(MemoryStore::new()));
    controller
        .start(Arc::new(PanickingListener), VehicleMode::Car)
        .unwrap();

    source.handle().on_update(location(48.1));

    assert_running(&controller);
    controller.stop().unwrap();
}

#[test]
fn test_start_fails_when_worker_never_acknowledges() {
    let (indicator, _hiding) = SlowIndicator::new(Duration::from_millis(600), Duration::ZERO);
    let config = CaptureConfig {
        controller: ControllerConfig {
            attach_timeout_ms: 100,
            ..ControllerConfig::default()
        },
        ..CaptureConfig::default()
    };
    let controller = controller_with_indicator(indicator.clone(), config);
    let (listener, _events) = RecordingListener::new();

    let err = controller.start(listener, VehicleMode::Car).unwrap_err();

    assert!(matches!(err, CaptureError::SetupFailure { .. }), "{:?}", err);
    assert!(controller.session().is_none());
    assert!(controller.attachment_state().is_none());
    // The abandoned worker was shut down before `start` returned.
    assert!(indicator.hidden.load(Ordering::SeqCst));
    assert_timed_out(&controller);
}

#[test]
fn test_is_running_during_slow_stop_honours_timeout() {
    let (indicator, hiding) = SlowIndicator::new(Duration::ZERO, Duration::from_millis(1500));
    let controller = Arc::new(controller_with_indicator(
        indicator,
        CaptureConfig::default(),
    ));
    let (listener, _events) = RecordingListener::new();
    controller.start(listener, VehicleMode::Car).unwrap();

    let stopping = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.stop())
    };
    hiding.recv_timeout(WAIT).unwrap();

    let callback = RecordingCallback::default();
    let started = Instant::now();
    controller.is_running(Duration::from_millis(100), &callback);

    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(callback.counts(), (0, 1));
    stopping.join().unwrap().unwrap();
}
