use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pulsein_rs::message_queue::{MessageKind, Wait};
use pulsein_rs::scripted_line::{LineEvent, LineRecorder};
use pulsein_rs::{
    dump_samples, CaptureState, Command, ControlHandler, EngineSettings, ExitReason, GpioError,
    GpioLine, Level, LockMode, ManualClock, MemoryQueue, MessageQueue, PulseClient, PulseEngine,
    ScriptedLine, WallClock, CONSUMER,
};

use Level::{High, Low};

struct Session {
    shared: Arc<CaptureState>,
    recorder: LineRecorder,
    engine: thread::JoinHandle<pulsein_rs::Result<ExitReason>>,
    handler: thread::JoinHandle<pulsein_rs::Result<()>>,
    client: PulseClient<MemoryQueue>,
    queue: MemoryQueue,
}

/// Start an engine and a control handler over a scripted line that advances
/// a manual clock by 10 us per read.
fn start(runs: &[(Level, usize)], settings: EngineSettings) -> Session {
    let clock = ManualClock::new();
    let mut line = ScriptedLine::from_runs(runs).advancing(clock.handle(), 10);
    line.request_input(CONSUMER).unwrap();
    let recorder = line.recorder();
    let shared = Arc::new(CaptureState::new(Box::new(line), 8, LockMode::Block));

    let queue = MemoryQueue::new();
    let mut handler = ControlHandler::new(queue.clone(), shared.clone(), settings.idle_level);
    let handler = thread::spawn(move || handler.serve());

    let mut engine = PulseEngine::new(shared.clone(), clock, settings);
    let engine = thread::spawn(move || engine.run());

    Session {
        shared,
        recorder,
        engine,
        handler,
        client: PulseClient::new(queue.clone(), Duration::from_secs(5)),
        queue,
    }
}

fn wait_for_len(client: &mut PulseClient<MemoryQueue>, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.len().unwrap() != expected {
        assert!(Instant::now() < deadline, "buffer never reached {expected} samples");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_controller_session() {
    let mut session = start(
        &[(Low, 1), (High, 2), (Low, 3), (High, 2), (Low, 2)],
        EngineSettings::new(Low),
    );
    let client = &mut session.client;

    assert_eq!(client.wait_ready().unwrap(), i64::from(std::process::id()));
    wait_for_len(client, 3);

    assert_eq!(client.peek(-1).unwrap(), Some(20));
    assert_eq!(client.peek(1).unwrap(), Some(30));
    assert_eq!(client.peek(3).unwrap(), None);
    assert_eq!(client.pop().unwrap(), Some(20));
    assert_eq!(client.len().unwrap(), 2);

    // Replies are sent in order, so once `len` answers the pause is in effect.
    client.pause().unwrap();
    client.len().unwrap();
    assert!(session.shared.is_paused());
    let reads = session.recorder.reads();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(session.recorder.reads(), reads);

    session.recorder.clear();
    client.trigger(5).unwrap();
    client.len().unwrap();
    assert!(!session.shared.is_paused());
    assert_eq!(
        session.recorder.events(),
        vec![
            LineEvent::Release,
            LineEvent::RequestOutput(Low),
            LineEvent::Set(High),
            LineEvent::Set(Low),
            LineEvent::Release,
            LineEvent::RequestInput,
        ]
    );

    client.clear().unwrap();
    assert_eq!(client.len().unwrap(), 0);
    assert_eq!(client.pop().unwrap(), None);

    session.shared.request_shutdown();
    assert_eq!(session.engine.join().unwrap().unwrap(), ExitReason::Shutdown);
    session.handler.join().unwrap().unwrap();
}

#[test]
fn test_malformed_requests_get_no_reply() {
    let mut session = start(&[(Low, 1), (High, 1), (Low, 1)], EngineSettings::new(Low));
    assert!(session.client.wait_ready().is_ok());
    wait_for_len(&mut session.client, 1);

    session.queue.send(MessageKind::Request, b"x").unwrap();
    session.queue.send(MessageKind::Request, b"tabc").unwrap();
    assert_eq!(session.client.len().unwrap(), 1);
    assert_eq!(
        session
            .queue
            .recv(MessageKind::Reply, Wait::Timeout(Duration::from_millis(50)))
            .unwrap(),
        None
    );

    session.shared.request_shutdown();
    session.engine.join().unwrap().unwrap();
    session.handler.join().unwrap().unwrap();
}

#[test]
fn test_idle_timeout_dumps_buffer() {
    let mut session = start(
        &[(Low, 2), (High, 3), (Low, 4), (High, 1), (Low, 1)],
        EngineSettings::new(Low).with_idle_timeout(500),
    );
    assert!(session.client.wait_ready().is_ok());

    assert_eq!(
        session.engine.join().unwrap().unwrap(),
        ExitReason::IdleTimeout
    );

    let mut out = Vec::new();
    assert_eq!(dump_samples(&session.shared, &mut out).unwrap(), 3);
    assert_eq!(String::from_utf8(out).unwrap(), "30,40,10\n");

    session.shared.request_shutdown();
    session.handler.join().unwrap().unwrap();
}

/// Device that answers a trigger: it reads idle until driven active, then
/// holds the line active. Driving it takes a while.
#[derive(Default)]
struct RespondingLine {
    driven: bool,
}

impl GpioLine for RespondingLine {
    fn offset(&self) -> u32 {
        0
    }

    fn request_input(&mut self, _consumer: &str) -> Result<(), GpioError> {
        Ok(())
    }

    fn request_output(&mut self, _consumer: &str, _initial: Level) -> Result<(), GpioError> {
        Ok(())
    }

    fn set_value(&mut self, level: Level) -> Result<(), GpioError> {
        if level == High {
            thread::sleep(Duration::from_millis(20));
            self.driven = true;
        }
        Ok(())
    }

    fn get_value(&mut self) -> Result<Level, GpioError> {
        Ok(if self.driven { High } else { Low })
    }

    fn release(&mut self) {}
}

#[test]
fn test_trigger_while_sampling_discards_response_edge() {
    let mut line = RespondingLine::default();
    line.request_input(CONSUMER).unwrap();
    let shared = Arc::new(CaptureState::new(Box::new(line), 8, LockMode::Block));
    let running = Arc::new(AtomicBool::new(true));

    let sampler = {
        let shared = shared.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut engine = PulseEngine::new(shared, WallClock::new(), EngineSettings::new(Low));
            while running.load(Ordering::Acquire) {
                engine.step().unwrap();
            }
        })
    };
    thread::sleep(Duration::from_millis(5));

    let mut handler = ControlHandler::new(MemoryQueue::new(), shared.clone(), Low);
    assert_eq!(
        handler
            .execute(Command::Trigger { duration_us: 10 })
            .unwrap(),
        None
    );
    thread::sleep(Duration::from_millis(20));

    running.store(false, Ordering::Release);
    sampler.join().unwrap();

    // The only edge after the trigger is the response going active, which
    // starts a pulse rather than ending one.
    assert!(!shared.is_paused());
    assert_eq!(shared.drain_samples(), Vec::<u32>::new());
}
