//! In-process stand-in for the coordinator
//!
//! Used when no hardware is attached and by tests. The simulated coordinator keeps
//! its own present/armed/pressed masks, answers `StatusRequest` with a snapshot,
//! only reports presses from armed devices, and records every command it receives.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::codec::binary::{encode_button_press, encode_status_snapshot};
use crate::codec::command::COMMAND_LEN;
use crate::codec::{Command, CommandType, ProtocolMode};
use crate::transport::{ByteSink, ByteSource, Transport};
use crate::types::{ButtonPress, DeviceId, DeviceMask, StatusSnapshot};
use crate::Result;

#[derive(Debug, Default)]
struct Coordinator {
    present: DeviceMask,
    armed: DeviceMask,
    pressed: DeviceMask,
    clock_ms: u32,
    game_id: u32,
    presses: u8,
}

impl Coordinator {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            device_mask: self.present,
            armed_mask: self.armed,
            pressed_mask: self.pressed,
            device_timestamp: self.clock_ms,
            game_id: self.game_id,
        }
    }

    fn apply(&mut self, command: &Command) {
        let targets = if command.is_broadcast() { self.present } else { DeviceMask::from_devices([command.target]) };
        self.game_id = command.session_id;

        match command.kind {
            CommandType::Arm => {
                self.armed = DeviceMask::new(self.armed.value() | (targets.value() & self.present.value()));
                self.pressed = DeviceMask::new(self.pressed.value() & !targets.value());
                if command.is_broadcast() {
                    self.presses = 0;
                }
            }
            CommandType::Disarm | CommandType::EndRound => {
                self.armed = DeviceMask::new(self.armed.value() & !targets.value());
            }
            CommandType::Test
            | CommandType::StatusRequest
            | CommandType::CorrectAnswerFeedback
            | CommandType::WrongAnswerFeedback => {}
        }
    }
}

type Shared = Arc<Mutex<Coordinator>>;

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, Coordinator> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn encode_snapshot(mode: ProtocolMode, snapshot: &StatusSnapshot) -> Vec<u8> {
    match mode {
        ProtocolMode::Binary => encode_status_snapshot(snapshot).to_vec(),
        ProtocolMode::Text => format!(
            "STATUS:device_mask={},armed_mask={},pressed_mask={},timestamp={},game_id={}\n",
            snapshot.device_mask.value(),
            snapshot.armed_mask.value(),
            snapshot.pressed_mask.value(),
            snapshot.device_timestamp,
            snapshot.game_id
        )
        .into_bytes(),
    }
}

fn encode_press(mode: ProtocolMode, press: &ButtonPress) -> Vec<u8> {
    match mode {
        ProtocolMode::Binary => encode_button_press(press).to_vec(),
        ProtocolMode::Text => format!(
            "BUZZER:{},{},{},{}\n",
            press.device_id, press.device_timestamp, press.delta_ms, press.position
        )
        .into_bytes(),
    }
}

/// Simulated coordinator link.
pub struct SimulatedTransport {
    mode: ProtocolMode,
    coordinator: Shared,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    commands_tx: mpsc::UnboundedSender<Command>,
}

impl SimulatedTransport {
    /// Create a simulated link and the handle that drives it.
    pub fn new(mode: ProtocolMode) -> (Self, SimulatorHandle) {
        let coordinator: Shared = Arc::default();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let handle = SimulatorHandle {
            mode,
            coordinator: Arc::clone(&coordinator),
            inbound: inbound_tx.clone(),
            commands: commands_rx,
        };
        (Self { mode, coordinator, inbound_tx, inbound_rx, commands_tx }, handle)
    }

    /// A link with no devices and nobody driving it.
    ///
    /// Commands are accepted and discarded; no bytes ever arrive.
    pub fn detached(mode: ProtocolMode) -> Self {
        let (transport, _handle) = Self::new(mode);
        transport
    }
}

impl Transport for SimulatedTransport {
    type Source = SimulatedSource;
    type Sink = SimulatedSink;

    fn describe(&self) -> String {
        format!("simulated ({:?})", self.mode)
    }

    fn is_hardware(&self) -> bool {
        false
    }

    fn into_split(self) -> (SimulatedSource, SimulatedSink) {
        let sink = SimulatedSink {
            mode: self.mode,
            coordinator: self.coordinator,
            inbound: self.inbound_tx,
            commands: self.commands_tx,
            pending: Vec::new(),
        };
        (SimulatedSource { inbound: self.inbound_rx }, sink)
    }
}

/// Inbound half; yields whatever the handle injected.
pub struct SimulatedSource {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait::async_trait]
impl ByteSource for SimulatedSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.inbound.recv().await {
                Some(bytes) if bytes.is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

/// Outbound half; feeds commands to the simulated coordinator.
pub struct SimulatedSink {
    mode: ProtocolMode,
    coordinator: Shared,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    commands: mpsc::UnboundedSender<Command>,
    pending: Vec<u8>,
}

#[async_trait::async_trait]
impl ByteSink for SimulatedSink {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);

        while self.pending.len() >= COMMAND_LEN {
            let Some(command) = Command::parse(&self.pending) else {
                trace!(byte = self.pending[0], "Simulated coordinator skipping unframed byte");
                self.pending.remove(0);
                continue;
            };
            self.pending.drain(..COMMAND_LEN);
            debug!(kind = ?command.kind, target = command.target, "Simulated coordinator received command");

            let reply = {
                let mut coordinator = lock(&self.coordinator);
                coordinator.apply(&command);
                match command.kind {
                    CommandType::StatusRequest => Some(encode_snapshot(self.mode, &coordinator.snapshot())),
                    _ if self.mode == ProtocolMode::Text => Some(format!("ACK:{:?}\n", command.kind).into_bytes()),
                    _ => None,
                }
            };
            if let Some(reply) = reply {
                let _ = self.inbound.send(reply);
            }
            let _ = self.commands.send(command);
        }
        Ok(())
    }
}

/// Test and demo control over a [`SimulatedTransport`].
pub struct SimulatorHandle {
    mode: ProtocolMode,
    coordinator: Shared,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SimulatorHandle {
    /// Power on hardware devices and report them with a status snapshot.
    pub fn connect_devices(&self, addresses: impl IntoIterator<Item = u8>) {
        let snapshot = {
            let mut coordinator = lock(&self.coordinator);
            let added = DeviceMask::from_devices(addresses);
            coordinator.present = DeviceMask::new(coordinator.present.value() | added.value());
            coordinator.snapshot()
        };
        self.inject(encode_snapshot(self.mode, &snapshot));
    }

    /// Send the current status snapshot unprompted.
    pub fn report_status(&self) {
        let snapshot = lock(&self.coordinator).snapshot();
        self.inject(encode_snapshot(self.mode, &snapshot));
    }

    /// Press a hardware buzzer `delta_ms` into the coordinator's round clock.
    ///
    /// Unarmed or absent devices do not report presses, mirroring the firmware.
    /// Returns whether a press frame was sent.
    pub fn press(&self, address: u8, delta_ms: u32) -> bool {
        let press = {
            let mut coordinator = lock(&self.coordinator);
            if !coordinator.armed.contains(address) {
                debug!(address, "Simulated press ignored, device not armed");
                return false;
            }
            coordinator.presses = coordinator.presses.saturating_add(1);
            coordinator.pressed = DeviceMask::new(coordinator.pressed.value() | DeviceMask::from_devices([address]).value());
            coordinator.clock_ms = coordinator.clock_ms.max(delta_ms);
            ButtonPress {
                device_id: DeviceId::Hardware(address),
                device_timestamp: coordinator.clock_ms,
                delta_ms,
                position: coordinator.presses,
            }
        };
        self.inject(encode_press(self.mode, &press));
        true
    }

    /// Push raw bytes into the inbound stream.
    pub fn inject(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(bytes.into());
    }

    /// Devices currently armed by the coordinator.
    pub fn armed(&self) -> DeviceMask {
        lock(&self.coordinator).armed
    }

    /// Next command the coordinator received, waiting if none is queued.
    pub async fn next_command(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    /// Every command received so far that has not been taken yet.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            commands.push(command);
        }
        commands
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }
}
