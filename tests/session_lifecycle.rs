use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use webcam_cast::{
    Camera, CameraOpener, CaptureConfig, HostedNetwork, NetworkMode, NetworkPath,
    NetworkProvisioner, RawImage, SessionController, SessionSettings, SessionState, StartOutcome,
    StopOutcome, StreamConfig, StreamError,
};

const HOTSPOT_GATEWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 137, 1));

#[derive(Default)]
struct CameraLedger {
    opens: AtomicUsize,
    released: AtomicUsize,
    unavailable: AtomicBool,
}

struct LedgerOpener(Arc<CameraLedger>);

struct LedgerCamera {
    ledger: Arc<CameraLedger>,
    frames: u8,
}

impl Camera for LedgerCamera {
    fn read(&mut self) -> Result<RawImage, StreamError> {
        self.frames = self.frames.wrapping_add(1);
        Ok(RawImage::Jpeg(vec![0xFF, 0xD8, self.frames, 0xFF, 0xD9]))
    }

    fn name(&self) -> &str {
        "ledger camera"
    }
}

impl Drop for LedgerCamera {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl CameraOpener for LedgerOpener {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn Camera>, StreamError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.0.unavailable.load(Ordering::SeqCst) {
            return Err(StreamError::DeviceUnavailable {
                index: config.device_index,
                reason: "unplugged".into(),
            });
        }
        Ok(Box::new(LedgerCamera {
            ledger: self.0.clone(),
            frames: 0,
        }))
    }
}

/// Opener that parks inside `open` until the test lets it continue.
struct GatedOpener {
    inner: LedgerOpener,
    entered: Mutex<Sender<()>>,
    gate: Mutex<Receiver<()>>,
}

impl CameraOpener for GatedOpener {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn Camera>, StreamError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.gate.lock().unwrap().recv();
        self.inner.open(config)
    }
}

#[derive(Default)]
struct FakeHotspot {
    supported: bool,
    fail_create: bool,
    creates: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl HostedNetwork for FakeHotspot {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(&self, _ssid: &str, _passphrase: &str) -> Result<(), StreamError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(StreamError::HotspotCreateFailed("driver refused".into()));
        }
        Ok(())
    }

    fn start(&self) -> Result<(), StreamError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), StreamError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn host_address(&self) -> IpAddr {
        HOTSPOT_GATEWAY
    }
}

fn settings(port: u16) -> SessionSettings {
    SessionSettings {
        capture: CaptureConfig {
            target_fps: 50.0,
            ..CaptureConfig::default()
        },
        stream: StreamConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            port,
            ..StreamConfig::default()
        },
    }
}

fn controller(
    hotspot: Arc<FakeHotspot>,
    ledger: Arc<CameraLedger>,
    port: u16,
) -> SessionController {
    let provisioner = NetworkProvisioner::new(hotspot)
        .with_probe_addr(SocketAddr::from(([127, 0, 0, 1], 9)));
    SessionController::new(settings(port), provisioner, Arc::new(LedgerOpener(ledger)))
}

fn read_stream_head(addr: SocketAddr) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(b"GET /video_feed HTTP/1.1\r\nHost: test\r\n\r\n")?;
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte)? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

#[test]
fn lan_session_runs_and_tears_down() -> Result<(), StreamError> {
    let ledger = Arc::new(CameraLedger::default());
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let recorded = transitions.clone();
    let session = controller(Arc::new(FakeHotspot::default()), ledger.clone(), 0)
        .with_observer(move |state| recorded.lock().unwrap().push(state));

    let payload = match session.start(NetworkMode::Lan, 0)? {
        StartOutcome::Started(payload) => payload,
        other => panic!("unexpected outcome {other:?}"),
    };
    let addr = session.stream_addr().expect("server address");
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(payload.scan, format!("http://127.0.0.1:{}/video_feed", addr.port()));
    assert_eq!(payload.url, payload.scan);
    assert!(payload.credentials.is_none());
    assert!(matches!(
        session.network_path(),
        Some(NetworkPath::Lan { port, .. }) if port == addr.port()
    ));

    let head = read_stream_head(addr).expect("stream response");
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("multipart/x-mixed-replace; boundary=frame"));

    assert_eq!(session.stop(), StopOutcome::Stopped);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(ledger.opens.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 1);
    assert!(session.payload().is_none());
    assert!(TcpStream::connect(addr).is_err());

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            SessionState::Starting,
            SessionState::Active,
            SessionState::Stopping,
            SessionState::Idle,
        ]
    );
    Ok(())
}

#[test]
fn hotspot_session_advertises_join_string_and_stops_hotspot() -> Result<(), StreamError> {
    let ledger = Arc::new(CameraLedger::default());
    let hotspot = Arc::new(FakeHotspot {
        supported: true,
        ..FakeHotspot::default()
    });
    let session = controller(hotspot.clone(), ledger.clone(), 0);

    let StartOutcome::Started(payload) = session.start(NetworkMode::Hotspot, 0)? else {
        panic!("hotspot session did not start");
    };
    let port = session.stream_addr().expect("server address").port();
    let creds = payload.credentials.clone().expect("hotspot credentials");
    assert!(creds.ssid.starts_with("WebCam_"));
    assert_eq!(creds.ssid.len(), "WebCam_".len() + 4);
    assert_eq!(creds.passphrase.len(), 10);
    assert!(creds
        .passphrase
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert_eq!(
        payload.scan,
        format!("WIFI:T:WPA;S:{};P:{};;", creds.ssid, creds.passphrase)
    );
    assert_eq!(payload.url, format!("http://192.168.137.1:{port}/video_feed"));
    assert_eq!(hotspot.creates.load(Ordering::SeqCst), 1);
    assert_eq!(hotspot.starts.load(Ordering::SeqCst), 1);

    session.stop();
    assert_eq!(hotspot.stops.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 1);

    // A stop while idle must not tear anything down twice.
    assert_eq!(session.stop(), StopOutcome::Rejected(SessionState::Idle));
    assert_eq!(hotspot.stops.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn hotspot_create_failure_never_opens_the_camera() {
    let ledger = Arc::new(CameraLedger::default());
    let hotspot = Arc::new(FakeHotspot {
        supported: true,
        fail_create: true,
        ..FakeHotspot::default()
    });
    let session = controller(hotspot.clone(), ledger.clone(), 0);

    let result = session.start(NetworkMode::Hotspot, 0);
    assert!(matches!(result, Err(StreamError::HotspotCreateFailed(_))));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(ledger.opens.load(Ordering::SeqCst), 0);
    assert_eq!(hotspot.starts.load(Ordering::SeqCst), 0);
    assert!(session.payload().is_none());
}

#[test]
fn unsupported_hotspot_is_never_created() {
    let ledger = Arc::new(CameraLedger::default());
    let hotspot = Arc::new(FakeHotspot::default());
    let session = controller(hotspot.clone(), ledger.clone(), 0);

    assert!(!session.hotspot_supported());
    let result = session.start(NetworkMode::Hotspot, 0);
    assert!(matches!(result, Err(StreamError::HotspotUnsupported)));
    assert_eq!(hotspot.creates.load(Ordering::SeqCst), 0);
    assert_eq!(ledger.opens.load(Ordering::SeqCst), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn camera_failure_rolls_back_the_hotspot() {
    let ledger = Arc::new(CameraLedger::default());
    ledger.unavailable.store(true, Ordering::SeqCst);
    let hotspot = Arc::new(FakeHotspot {
        supported: true,
        ..FakeHotspot::default()
    });
    let session = controller(hotspot.clone(), ledger.clone(), 0);

    let result = session.start(NetworkMode::Hotspot, 3);
    assert!(matches!(
        result,
        Err(StreamError::DeviceUnavailable { index: 3, .. })
    ));
    assert_eq!(hotspot.starts.load(Ordering::SeqCst), 1);
    assert_eq!(hotspot.stops.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn bind_failure_releases_camera_and_hotspot() {
    let occupied = TcpListener::bind("127.0.0.1:0").expect("occupy a port");
    let port = occupied.local_addr().expect("occupied addr").port();

    let ledger = Arc::new(CameraLedger::default());
    let hotspot = Arc::new(FakeHotspot {
        supported: true,
        ..FakeHotspot::default()
    });
    let session = controller(hotspot.clone(), ledger.clone(), port);

    let result = session.start(NetworkMode::Hotspot, 0);
    assert!(matches!(result, Err(StreamError::ServerBind { .. })));
    assert_eq!(ledger.opens.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 1);
    assert_eq!(hotspot.stops.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn session_can_be_restarted_after_stop() -> Result<(), StreamError> {
    let ledger = Arc::new(CameraLedger::default());
    let session = controller(Arc::new(FakeHotspot::default()), ledger.clone(), 0);

    for _ in 0..2 {
        assert!(matches!(
            session.start(NetworkMode::Lan, 0)?,
            StartOutcome::Started(_)
        ));
        assert_eq!(session.stop(), StopOutcome::Stopped);
    }
    assert_eq!(ledger.opens.load(Ordering::SeqCst), 2);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn start_is_rejected_while_another_start_is_in_progress() -> Result<(), StreamError> {
    let ledger = Arc::new(CameraLedger::default());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let opener = GatedOpener {
        inner: LedgerOpener(ledger.clone()),
        entered: Mutex::new(entered_tx),
        gate: Mutex::new(gate_rx),
    };
    let provisioner = NetworkProvisioner::new(Arc::new(FakeHotspot::default()))
        .with_probe_addr(SocketAddr::from(([127, 0, 0, 1], 9)));
    let session = Arc::new(SessionController::new(
        settings(0),
        provisioner,
        Arc::new(opener),
    ));

    let first = {
        let session = session.clone();
        std::thread::spawn(move || session.start(NetworkMode::Lan, 0))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first start reached the camera");

    assert_eq!(session.state(), SessionState::Starting);
    assert_eq!(
        session.start(NetworkMode::Lan, 1)?,
        StartOutcome::Rejected(SessionState::Starting)
    );
    assert_eq!(session.stop(), StopOutcome::Rejected(SessionState::Starting));

    gate_tx.send(()).expect("release the first start");
    let outcome = first.join().expect("first start thread")?;
    assert!(matches!(outcome, StartOutcome::Started(_)));
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(ledger.opens.load(Ordering::SeqCst), 1);

    assert_eq!(session.stop(), StopOutcome::Stopped);
    assert_eq!(ledger.released.load(Ordering::SeqCst), 1);
    Ok(())
}
