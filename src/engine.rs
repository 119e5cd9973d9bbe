//! The reactor
//!
//! A single task owns the codec, the device registry and the session machine.
//! Serial bytes, timer expiries and boundary commands all arrive on one queue and
//! are processed to completion one at a time, so no two inputs ever observe each
//! other half-applied. Outbound frames go to the writer task through a queue; the
//! reactor never waits on the link.
//!
//! Callers talk to the reactor through a cloneable [`EngineHandle`]. When the last
//! handle is dropped the reactor, its reader task and any pending timers stop.

use futures::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::arbitration::PressSummary;
use crate::codec::{CodecStats, Command, FrameCodec};
use crate::config::Config;
use crate::driver::Driver;
use crate::error::Rejection;
use crate::gateway::{DeviceTable, Event, EventGateway};
use crate::registry::DeviceRegistry;
use crate::session::{Effect, Evaluation, SessionMachine, SessionState, StartQuestion};
use crate::transport::Transport;
use crate::types::{DeviceId, Frame, GroupId, UpdateRate};
use crate::{BuzzerError, Result};

type Reply<T> = oneshot::Sender<std::result::Result<T, Rejection>>;

/// Everything the reactor reacts to.
pub(crate) enum Input {
    Bytes(Vec<u8>),
    SourceClosed { failed: bool },
    TimerFired { generation: u64 },
    Request(Request),
}

pub(crate) enum Request {
    Start(StartQuestion, Reply<()>),
    End(Reply<bool>),
    Evaluate(bool, Reply<Evaluation>),
    GiveUp(Reply<()>),
    Reset(Reply<()>),
    FinishGame(Reply<()>),
    Arm(Vec<DeviceId>, Reply<usize>),
    Disarm(Reply<()>),
    Feedback(DeviceId, bool, Reply<bool>),
    VirtualPress(DeviceId, Reply<PressSummary>),
    RequestStatus(Reply<()>),
    TestDevices(Reply<()>),
    AssignTeam(DeviceId, u32, Reply<()>),
    Scores(Reply<Vec<(GroupId, u64)>>),
    Status(Reply<EngineStatus>),
    Shutdown,
}

/// Point-in-time view of the reactor.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: SessionState,
    pub question_id: Option<u64>,
    pub presses: Vec<PressSummary>,
    pub transport: String,
    /// Whether real hardware sits behind the link
    pub hardware: bool,
    /// False once the reader task has closed or given up
    pub link_up: bool,
    pub codec: CodecStats,
    pub devices_known: usize,
    /// Hardware addresses live by the authoritative threshold
    pub live_devices: Vec<u8>,
}

/// Reactor state. Lives inside the spawned task.
struct Engine {
    codec: FrameCodec,
    registry: DeviceRegistry,
    machine: SessionMachine,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    gateway: EventGateway,
    inputs: mpsc::UnboundedSender<Input>,
    timers: HashMap<u64, CancellationToken>,
    announced: HashMap<DeviceId, bool>,
    display_staleness: Duration,
    liveness_poll: Duration,
    transport: String,
    hardware: bool,
    link_up: bool,
    clock: Clock,
    cancel: CancellationToken,
}

/// Wall-clock readings derived from the runtime's monotonic clock.
///
/// Liveness is judged against wall time, but reading it through Tokio's clock keeps
/// a paused test runtime in control of when devices go stale.
#[derive(Debug, Clone, Copy)]
struct Clock {
    started: Instant,
    wall: SystemTime,
}

impl Clock {
    fn new() -> Self {
        Self { started: Instant::now(), wall: SystemTime::now() }
    }

    fn wall_at(&self, at: Instant) -> SystemTime {
        self.wall + at.saturating_duration_since(self.started)
    }

    fn now(&self) -> SystemTime {
        self.wall_at(Instant::now())
    }
}

/// Spawn the reactor plus the reader and writer tasks for `transport`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn<T: Transport>(transport: T, config: &Config) -> EngineHandle {
    let description = transport.describe();
    let hardware = transport.is_hardware();
    let (source, sink) = transport.into_split();
    let (inputs, receiver) = mpsc::unbounded_channel();
    let (outbound, pending_writes) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let gateway = EventGateway::new(config.event_capacity);

    let mut machine = SessionMachine::new(config.game_id, config.roster.clone(), config.time_based_scoring);
    if let Some(participants) = &config.participants {
        machine = machine.with_participants(participants.clone());
    }

    Driver::spawn(source, inputs.clone(), cancel.child_token());
    Driver::spawn_writer(sink, pending_writes, cancel.child_token());

    let engine = Engine {
        codec: FrameCodec::new(config.protocol()),
        registry: DeviceRegistry::new(config.staleness()),
        machine,
        outbound,
        gateway: gateway.clone(),
        inputs: inputs.clone(),
        timers: HashMap::new(),
        announced: HashMap::new(),
        display_staleness: config.display_staleness(),
        liveness_poll: config.liveness_poll(),
        transport: description,
        hardware,
        link_up: true,
        clock: Clock::new(),
        cancel: cancel.clone(),
    };
    tokio::spawn(engine.run(receiver));

    EngineHandle { inputs, gateway, _guard: Arc::new(cancel.drop_guard()) }
}

impl Engine {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        info!(transport = %self.transport, protocol = ?self.codec.mode(), "Engine started");
        let mut liveness = tokio::time::interval(self.liveness_poll);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Engine cancelled");
                    break;
                }
                input = inputs.recv() => match input {
                    Some(Input::Request(Request::Shutdown)) | None => break,
                    Some(input) => self.handle(input),
                },
                _ = liveness.tick() => self.refresh_devices(self.clock.now()),
            }
        }

        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        self.cancel.cancel();
        info!(stats = ?self.codec.stats(), "Engine stopped");
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Bytes(chunk) => {
                let received_at = Instant::now();
                let wall = self.clock.wall_at(received_at);
                let frames: Vec<Frame> = self.codec.decode(&chunk).collect();
                for frame in frames {
                    self.dispatch(frame, received_at, wall);
                    self.flush();
                }
            }
            Input::SourceClosed { failed } => {
                self.link_up = false;
                if failed {
                    warn!(transport = %self.transport, "Transport lost, continuing without hardware");
                } else {
                    warn!(transport = %self.transport, "Transport closed, continuing without hardware");
                }
            }
            Input::TimerFired { generation } => {
                self.timers.remove(&generation);
                if self.machine.timer_expired(generation) {
                    info!(generation, "Question timer expired");
                }
                self.flush();
            }
            Input::Request(request) => self.handle_request(request),
        }
    }

    fn dispatch(&mut self, frame: Frame, received_at: Instant, wall: SystemTime) {
        match frame {
            Frame::ButtonPress(press) => {
                if let Err(reason) =
                    self.machine.try_accept(press.device_id.clone(), Some(press.device_timestamp), received_at)
                {
                    debug!(device_id = %press.device_id, %reason, "Press rejected");
                    self.gateway.publish(Event::PressRejected { device_id: press.device_id, reason });
                }
            }
            Frame::StatusSnapshot(snapshot) => {
                let changed = self.registry.apply_snapshot(&snapshot, wall);
                self.announce(&changed, wall);
            }
            Frame::DeviceReport(report) => {
                if let Some(id) = self.registry.apply_report(&report, wall) {
                    self.announce(&[id], wall);
                }
            }
            Frame::Acknowledge { text } => {
                debug!(%text, "Coordinator acknowledged");
                self.gateway.publish(Event::DeviceAck { text });
            }
            Frame::ProtocolError { text } => {
                warn!(%text, "Coordinator reported an error");
                self.gateway.publish(Event::DeviceError { text });
            }
        }
    }

    fn announce(&mut self, changed: &[DeviceId], now: SystemTime) {
        if changed.is_empty() {
            return;
        }
        let threshold = self.registry.staleness();
        for id in changed {
            if let Some(device) = self.registry.get(id) {
                let status = device.status(now, threshold, self.display_staleness);
                self.announced.insert(id.clone(), status.online);
                self.gateway.publish(Event::device_status(&status));
            }
        }
        self.gateway.publish_devices(self.registry.statuses(now, self.display_staleness));
    }

    /// Re-evaluate liveness so devices that went silent flip offline.
    fn refresh_devices(&mut self, now: SystemTime) {
        let statuses = self.registry.statuses(now, self.display_staleness);
        for status in &statuses {
            let previous = self.announced.insert(status.device_id.clone(), status.online);
            if previous.is_some_and(|was| was != status.online) {
                info!(device_id = %status.device_id, online = status.online, "Device liveness changed");
                self.gateway.publish(Event::device_status(status));
            }
        }
        self.gateway.publish_devices(statuses);
    }

    fn handle_request(&mut self, request: Request) {
        let now = Instant::now();
        match request {
            Request::Start(question, reply) => {
                let result = self.machine.start(question, now);
                self.respond(reply, result);
            }
            Request::End(reply) => {
                let result = self.machine.end();
                self.respond(reply, result);
            }
            Request::Evaluate(is_correct, reply) => {
                let result = self.machine.evaluate(is_correct);
                self.respond(reply, result);
            }
            Request::GiveUp(reply) => {
                let result = self.machine.give_up();
                self.respond(reply, result);
            }
            Request::Reset(reply) => {
                let result = self.machine.reset();
                self.respond(reply, result);
            }
            Request::FinishGame(reply) => {
                let result = self.machine.finish_game();
                self.respond(reply, result);
            }
            Request::Arm(devices, reply) => {
                let result = self.machine.arm(&devices);
                self.respond(reply, result);
            }
            Request::Disarm(reply) => {
                self.machine.disarm_all();
                self.respond(reply, Ok(()));
            }
            Request::Feedback(device, correct, reply) => {
                let sent = self.machine.feedback(&device, correct);
                self.respond(reply, Ok(sent));
            }
            Request::VirtualPress(device, reply) => {
                let result = self.machine.try_accept(device.clone(), None, now);
                if let Err(reason) = result {
                    debug!(device_id = %device, %reason, "Virtual press rejected");
                    self.gateway.publish(Event::PressRejected { device_id: device, reason });
                }
                self.respond(reply, result);
            }
            Request::RequestStatus(reply) => {
                self.machine.request_status();
                self.respond(reply, Ok(()));
            }
            Request::TestDevices(reply) => {
                self.machine.test_devices();
                self.respond(reply, Ok(()));
            }
            Request::AssignTeam(device, team, reply) => {
                debug!(device_id = %device, team, "Roster updated");
                self.machine.roster_mut().assign(device, team);
                let _ = reply.send(Ok(()));
            }
            Request::Scores(reply) => {
                let _ = reply.send(Ok(self.machine.scores()));
            }
            Request::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
            // Handled by the run loop
            Request::Shutdown => {}
        }
    }

    /// Apply queued effects, then answer the caller.
    fn respond<T>(&mut self, reply: Reply<T>, result: std::result::Result<T, Rejection>) {
        if let Err(reason) = &result {
            debug!(%reason, "Command rejected");
        }
        self.flush();
        let _ = reply.send(result);
    }

    fn flush(&mut self) {
        let effects: Vec<Effect> = self.machine.drain_effects().collect();
        for effect in effects {
            match effect {
                Effect::Send(command) => self.send(command),
                Effect::StartTimer { generation, after } => self.start_timer(generation, after),
                Effect::CancelTimer { generation } => {
                    if let Some(timer) = self.timers.remove(&generation) {
                        debug!(generation, "Question timer cancelled");
                        timer.cancel();
                    }
                }
                Effect::Emit(event) => self.gateway.publish(event),
            }
        }
    }

    fn send(&mut self, command: Command) {
        let bytes = self.codec.encode(&command);
        match self.outbound.send(bytes) {
            Ok(()) => debug!(kind = ?command.kind, target = command.target, "Command queued"),
            Err(_) => warn!(kind = ?command.kind, target = command.target, "Writer gone, command dropped"),
        }
    }

    fn start_timer(&mut self, generation: u64, after: Duration) {
        let timer = self.cancel.child_token();
        let cancelled = timer.clone();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = inputs.send(Input::TimerFired { generation });
                }
            }
        });
        self.timers.insert(generation, timer);
    }

    fn status(&self) -> EngineStatus {
        let current = self.machine.current();
        EngineStatus {
            state: self.machine.state(),
            question_id: current.map(|s| s.question_id()),
            presses: current.map(|s| s.log().summaries()).unwrap_or_default(),
            transport: self.transport.clone(),
            hardware: self.hardware,
            link_up: self.link_up,
            codec: self.codec.stats(),
            devices_known: self.registry.len(),
            live_devices: self.registry.live_addresses(self.clock.now()),
        }
    }
}

/// Cloneable command and subscription interface to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    inputs: mpsc::UnboundedSender<Input>,
    gateway: EventGateway,
    _guard: Arc<DropGuard>,
}

impl EngineHandle {
    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inputs.send(Input::Request(request(reply))).map_err(|_| BuzzerError::EngineStopped)?;
        let result = response.await.map_err(|_| BuzzerError::EngineStopped)?;
        Ok(result?)
    }

    /// Put a question on air and arm the buzzers.
    pub async fn start_question(&self, question: StartQuestion) -> Result<()> {
        self.call(|reply| Request::Start(question, reply)).await
    }

    /// End the question early. `Ok(false)` if it had already ended.
    pub async fn end_question(&self) -> Result<bool> {
        self.call(Request::End).await
    }

    /// Judge the earliest unevaluated press.
    pub async fn evaluate_answer(&self, is_correct: bool) -> Result<Evaluation> {
        self.call(|reply| Request::Evaluate(is_correct, reply)).await
    }

    pub async fn give_up(&self) -> Result<()> {
        self.call(Request::GiveUp).await
    }

    /// Abort the current question without resolving it.
    pub async fn reset(&self) -> Result<()> {
        self.call(Request::Reset).await
    }

    pub async fn finish_game(&self) -> Result<()> {
        self.call(Request::FinishGame).await
    }

    /// Arm the listed devices, or all devices when the list is empty.
    pub async fn arm_devices(&self, devices: Vec<DeviceId>) -> Result<usize> {
        self.call(|reply| Request::Arm(devices, reply)).await
    }

    pub async fn disarm_devices(&self) -> Result<()> {
        self.call(Request::Disarm).await
    }

    /// Light a device's answer indicator. `Ok(false)` for virtual devices.
    pub async fn send_feedback(&self, device: impl Into<DeviceId>, correct: bool) -> Result<bool> {
        let device = device.into();
        self.call(|reply| Request::Feedback(device, correct, reply)).await
    }

    /// Press a buzzer that has no serial link, such as a phone.
    pub async fn virtual_press(&self, device: impl Into<DeviceId>) -> Result<PressSummary> {
        let device = device.into();
        self.call(|reply| Request::VirtualPress(device, reply)).await
    }

    pub async fn request_status(&self) -> Result<()> {
        self.call(Request::RequestStatus).await
    }

    pub async fn test_devices(&self) -> Result<()> {
        self.call(Request::TestDevices).await
    }

    /// Move a device to a team for subsequent presses.
    pub async fn assign_team(&self, device: impl Into<DeviceId>, team: u32) -> Result<()> {
        let device = device.into();
        self.call(|reply| Request::AssignTeam(device, team, reply)).await
    }

    /// Scoreboard, highest first.
    pub async fn scores(&self) -> Result<Vec<(GroupId, u64)>> {
        self.call(Request::Scores).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.call(Request::Status).await
    }

    /// Raw event receiver. Subscribe before issuing commands to see their events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.gateway.subscribe()
    }

    /// Event stream that tolerates lagging.
    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        self.gateway.events()
    }

    /// Latest device table.
    pub fn devices(&self) -> DeviceTable {
        self.gateway.devices()
    }

    /// Device table updates for displays.
    pub fn device_updates(&self, rate: UpdateRate) -> impl Stream<Item = DeviceTable> + Send + 'static {
        self.gateway.device_updates(rate)
    }

    /// Stop the reactor. Other handles observe [`BuzzerError::EngineStopped`].
    pub fn shutdown(&self) {
        let _ = self.inputs.send(Input::Request(Request::Shutdown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CommandType, ProtocolMode};
    use crate::test_utils::{press_bytes, status_bytes};
    use crate::transport::{ByteSink, ByteSource};
    use crate::transports::{SimulatedTransport, SimulatorHandle};

    fn config() -> Config {
        let mut config = Config { time_based_scoring: true, game_id: 3, ..Config::default() };
        config.roster.assign(1u8, 1);
        config.roster.assign(2u8, 2);
        config
    }

    fn simulated(config: &Config) -> (EngineHandle, SimulatorHandle) {
        let (transport, simulator) = SimulatedTransport::new(ProtocolMode::Binary);
        (spawn(transport, config), simulator)
    }

    async fn next_named(events: &mut broadcast::Receiver<Event>, name: &str) -> Event {
        loop {
            let event = events.recv().await.unwrap();
            if event.name() == name {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ends_question_and_late_press_is_rejected() {
        let (engine, simulator) = simulated(&config());
        let mut events = engine.subscribe();

        engine.start_question(StartQuestion::new(1, 10_000, 100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10_001)).await;

        let ended = next_named(&mut events, "question_ended").await;
        assert_eq!(ended, Event::QuestionEnded { question_id: 1, presses_so_far: vec![] });

        simulator.inject(press_bytes(1, 10_500, 1));
        let rejected = next_named(&mut events, "press_rejected").await;
        assert_eq!(
            rejected,
            Event::PressRejected { device_id: DeviceId::Hardware(1), reason: Rejection::NoActiveQuestion }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_end_cancels_timer_for_next_question() {
        let (engine, _simulator) = simulated(&config());

        engine.start_question(StartQuestion::new(1, 5_000, 100)).await.unwrap();
        engine.virtual_press(DeviceId::from("phone-1")).await.unwrap();
        assert!(engine.end_question().await.unwrap());
        assert!(!engine.end_question().await.unwrap());
        engine.give_up().await.unwrap();

        engine.start_question(StartQuestion::new(2, 60_000, 100)).await.unwrap();
        // Well past the first question's limit, well short of the second's.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = engine.status().await.unwrap();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.question_id, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_presses_are_ranked_by_host_arrival() {
        let (engine, simulator) = simulated(&config());

        engine.start_question(StartQuestion::new(1, 30_000, 100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        // Device-reported delta is ignored for ranking and scoring.
        simulator.inject(press_bytes(2, 50, 1));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        simulator.inject(press_bytes(1, 10, 2));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let status = engine.status().await.unwrap();
        let ranked: Vec<(DeviceId, u32, u64)> =
            status.presses.iter().map(|p| (p.device_id.clone(), p.position, p.delta_ms)).collect();
        assert_eq!(ranked, vec![(DeviceId::Hardware(2), 1, 5_000), (DeviceId::Hardware(1), 2, 6_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_press_disarms_the_device() {
        let (engine, mut simulator) = simulated(&config());
        simulator.connect_devices([1, 2]);

        engine.start_question(StartQuestion::new(1, 30_000, 100)).await.unwrap();
        assert_eq!(simulator.next_command().await, Some(Command::broadcast(CommandType::Arm, 3)));

        assert!(simulator.press(2, 700));
        assert_eq!(simulator.next_command().await, Some(Command::to_device(CommandType::Disarm, 2, 3)));
        assert_eq!(simulator.armed().value(), 0b01);
    }

    #[tokio::test(start_paused = true)]
    async fn status_snapshot_updates_device_table() {
        let (engine, simulator) = simulated(&config());
        let mut events = engine.subscribe();

        simulator.inject(status_bytes(0b1, 0, 0));
        let changed = next_named(&mut events, "device_status_changed").await;
        assert_eq!(
            changed,
            Event::DeviceStatusChanged {
                device_id: DeviceId::Hardware(1),
                online: true,
                armed: false,
                pressed: false,
                battery_pct: None
            }
        );
        assert!(engine.devices()[0].online);
    }

    #[tokio::test(start_paused = true)]
    async fn virtual_press_goes_through_the_same_gate() {
        let (engine, _simulator) = simulated(&config());

        let rejected = engine.virtual_press("phone-1").await.unwrap_err();
        assert_eq!(rejected.rejection(), Some(Rejection::NoActiveQuestion));

        engine.start_question(StartQuestion::new(1, 30_000, 100)).await.unwrap();
        engine.assign_team("phone-1", 9).await.unwrap();
        let press = engine.virtual_press("phone-1").await.unwrap();
        assert_eq!(press.group_id, GroupId::Team(9));

        let again = engine.virtual_press("phone-1").await.unwrap_err();
        assert_eq!(again.rejection(), Some(Rejection::AlreadyBuzzed));
    }

    /// A link whose reader closes at once and whose writer either swallows bytes or
    /// never finishes a write.
    struct DeadLink {
        stall_writes: bool,
    }

    struct ClosedSource;

    #[async_trait::async_trait]
    impl ByteSource for ClosedSource {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    struct DeadSink {
        stall_writes: bool,
    }

    #[async_trait::async_trait]
    impl ByteSink for DeadSink {
        async fn send(&mut self, _bytes: &[u8]) -> Result<()> {
            if self.stall_writes {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    impl Transport for DeadLink {
        type Source = ClosedSource;
        type Sink = DeadSink;

        fn describe(&self) -> String {
            "dead link".into()
        }

        fn is_hardware(&self) -> bool {
            true
        }

        fn into_split(self) -> (ClosedSource, DeadSink) {
            (ClosedSource, DeadSink { stall_writes: self.stall_writes })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_keeps_the_session_running() {
        let engine = spawn(DeadLink { stall_writes: false }, &config());
        tokio::time::sleep(Duration::from_millis(1)).await;

        let status = engine.status().await.unwrap();
        assert!(status.hardware);
        assert!(!status.link_up);

        engine.start_question(StartQuestion::new(1, 30_000, 50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        engine.virtual_press("phone-1").await.unwrap();
        assert!(engine.end_question().await.unwrap());
        let evaluation = engine.evaluate_answer(true).await.unwrap();
        assert_eq!(evaluation.device_id, DeviceId::from("phone-1"));
        assert_eq!(evaluation.points_awarded, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writes_do_not_block_the_engine() {
        let engine = spawn(DeadLink { stall_writes: true }, &config());
        let mut events = engine.subscribe();

        // Every one of these queues a command the link never accepts.
        engine.start_question(StartQuestion::new(1, 2_000, 10)).await.unwrap();
        engine.request_status().await.unwrap();
        engine.virtual_press("phone-1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_001)).await;
        assert!(matches!(next_named(&mut events, "question_ended").await, Event::QuestionEnded { question_id: 1, .. }));
        assert_eq!(engine.status().await.unwrap().state, SessionState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_goes_offline_after_the_threshold() {
        let (engine, simulator) = simulated(&config());
        let mut events = engine.subscribe();

        simulator.inject(status_bytes(0b1, 0, 0));
        let online = next_named(&mut events, "device_status_changed").await;
        assert!(matches!(online, Event::DeviceStatusChanged { online: true, .. }));
        assert_eq!(engine.status().await.unwrap().live_devices, vec![1]);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(engine.status().await.unwrap().live_devices, vec![1]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let offline = next_named(&mut events, "device_status_changed").await;
        assert_eq!(
            offline,
            Event::DeviceStatusChanged {
                device_id: DeviceId::Hardware(1),
                online: false,
                armed: false,
                pressed: false,
                battery_pct: None
            }
        );
        assert!(engine.status().await.unwrap().live_devices.is_empty());
        assert!(!engine.devices()[0].online);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_engine() {
        let (engine, _simulator) = simulated(&config());
        let mut events = engine.subscribe();
        drop(engine);

        // The gateway sender lives in the engine task; it is dropped when the task ends.
        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_later_calls() {
        let (engine, _simulator) = simulated(&config());
        engine.shutdown();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(engine.status().await, Err(BuzzerError::EngineStopped)));
    }
}
