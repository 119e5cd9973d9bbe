//! Question session state machine
//!
//! One question is on air at a time:
//!
//! ```text
//!   Setup ──start──▶ Active ──end / timer──▶ Ended ──resolve──▶ Setup
//!     │                 │                      │
//!     │                 ├──────give_up─────────┘
//!     │                 └──end, no presses──▶ Setup
//!     └──finish_game──▶ GameOver
//! ```
//!
//! The machine performs no I/O. Every outbound command, timer request and event is
//! queued as an [`Effect`] which the engine drains after each transition, so a whole
//! transition is visible to the outside world only once it has completed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::arbitration::{ArbitrationLog, PressSummary, Roster};
use crate::codec::{Command, CommandType};
use crate::error::Rejection;
use crate::gateway::Event;
use crate::types::{DeviceId, GroupId};

/// Lifecycle of the question slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the next question
    Setup,
    /// Timer running, presses accepted
    Active,
    /// Presses frozen, evaluation pending
    Ended,
    /// Terminal
    GameOver,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Setup => "setup",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
            SessionState::GameOver => "game_over",
        })
    }
}

/// Parameters of a question about to go on air.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartQuestion {
    pub question_id: u64,
    pub time_limit_ms: u64,
    pub original_points: u64,
    /// Restrict arming to these devices
    #[serde(default)]
    pub targets: Option<Vec<DeviceId>>,
}

impl StartQuestion {
    pub fn new(question_id: u64, time_limit_ms: u64, original_points: u64) -> Self {
        Self { question_id, time_limit_ms, original_points, targets: None }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = impl Into<DeviceId>>) -> Self {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }
}

/// The question currently on air.
#[derive(Debug, Clone)]
pub struct QuestionSession {
    question_id: u64,
    started_at: Instant,
    started_wall: SystemTime,
    time_limit: Duration,
    original_points: u64,
    log: ArbitrationLog,
    timer: u64,
}

impl QuestionSession {
    pub fn question_id(&self) -> u64 {
        self.question_id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn original_points(&self) -> u64 {
        self.original_points
    }

    pub fn log(&self) -> &ArbitrationLog {
        &self.log
    }

    /// Generation of the automatic end timer armed for this session.
    pub fn timer_generation(&self) -> u64 {
        self.timer
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(Command),
    StartTimer { generation: u64, after: Duration },
    CancelTimer { generation: u64 },
    Emit(Event),
}

/// Outcome of a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub group_id: GroupId,
    pub device_id: DeviceId,
    pub is_correct: bool,
    pub points_awarded: u64,
    pub question_resolved: bool,
}

/// Points for a correct answer given `delta_ms` after the start.
///
/// Full points at zero elapsed time, decaying linearly (rounded up) to zero at the
/// time limit.
pub fn time_decayed_points(original_points: u64, time_limit_ms: u64, delta_ms: u64) -> u64 {
    let remaining = time_limit_ms.saturating_sub(delta_ms);
    if remaining == 0 {
        return 0;
    }
    if remaining >= time_limit_ms {
        return original_points;
    }

    let numerator = u128::from(original_points) * u128::from(remaining);
    let limit = u128::from(time_limit_ms);
    u64::try_from(numerator.div_ceil(limit)).unwrap_or(original_points)
}

/// Owner of the question slot, the scoreboard and the outbound effect queue.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    current: Option<QuestionSession>,
    scores: HashMap<GroupId, u64>,
    roster: Roster,
    participants: Option<Vec<u8>>,
    game_id: u32,
    time_based_scoring: bool,
    next_timer: u64,
    effects: VecDeque<Effect>,
}

impl SessionMachine {
    pub fn new(game_id: u32, roster: Roster, time_based_scoring: bool) -> Self {
        Self {
            state: SessionState::Setup,
            current: None,
            scores: HashMap::new(),
            roster,
            participants: None,
            game_id,
            time_based_scoring,
            next_timer: 0,
            effects: VecDeque::new(),
        }
    }

    /// Devices armed by default when a question names no targets.
    ///
    /// Without participants every device is armed with a broadcast.
    pub fn with_participants(mut self, participants: Vec<u8>) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current(&self) -> Option<&QuestionSession> {
        self.current.as_ref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut Roster {
        &mut self.roster
    }

    /// Scoreboard, highest first.
    pub fn scores(&self) -> Vec<(GroupId, u64)> {
        let mut table: Vec<(GroupId, u64)> = self.scores.iter().map(|(g, s)| (g.clone(), *s)).collect();
        table.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        table
    }

    pub fn score_of(&self, group: &GroupId) -> u64 {
        self.scores.get(group).copied().unwrap_or(0)
    }

    /// Take every effect queued so far, oldest first.
    pub fn drain_effects(&mut self) -> impl Iterator<Item = Effect> + '_ {
        self.effects.drain(..)
    }

    fn send(&mut self, kind: CommandType, target: Option<u8>) {
        let command = match target {
            Some(address) => Command::to_device(kind, address, self.game_id),
            None => Command::broadcast(kind, self.game_id),
        };
        self.effects.push_back(Effect::Send(command));
    }

    fn emit(&mut self, event: Event) {
        self.effects.push_back(Effect::Emit(event));
    }

    fn ensure_not_over(&self) -> Result<(), Rejection> {
        match self.state {
            SessionState::GameOver => Err(Rejection::GameOver),
            _ => Ok(()),
        }
    }

    /// Put a question on air.
    pub fn start(&mut self, request: StartQuestion, now: Instant) -> Result<(), Rejection> {
        self.ensure_not_over()?;
        if self.state != SessionState::Setup {
            debug!(question_id = request.question_id, state = %self.state, "Rejected start while a question is on air");
            return Err(Rejection::QuestionAlreadyActive);
        }

        self.next_timer += 1;
        let generation = self.next_timer;
        let time_limit = Duration::from_millis(request.time_limit_ms);
        let session = QuestionSession {
            question_id: request.question_id,
            started_at: now,
            started_wall: SystemTime::now(),
            time_limit,
            original_points: request.original_points,
            log: ArbitrationLog::new(),
            timer: generation,
        };

        info!(
            question_id = request.question_id,
            time_limit_ms = request.time_limit_ms,
            points = request.original_points,
            "Question started"
        );

        let started_at = session.started_wall;
        self.current = Some(session);
        self.state = SessionState::Active;

        match request.targets {
            Some(targets) => {
                for address in targets.iter().filter_map(DeviceId::address) {
                    self.send(CommandType::Arm, Some(address));
                }
            }
            None => match self.participants.clone() {
                Some(participants) => {
                    for address in participants {
                        self.send(CommandType::Arm, Some(address));
                    }
                }
                None => self.send(CommandType::Arm, None),
            },
        }

        self.effects.push_back(Effect::StartTimer { generation, after: time_limit });
        self.emit(Event::QuestionStarted {
            question_id: request.question_id,
            started_at,
            time_limit_ms: request.time_limit_ms,
            original_points: request.original_points,
        });
        Ok(())
    }

    /// Stop accepting presses.
    ///
    /// A question nobody buzzed on resolves immediately with no winner. Returns
    /// `Ok(false)` when the question had already ended.
    pub fn end(&mut self) -> Result<bool, Rejection> {
        match self.state {
            SessionState::Active => {}
            SessionState::Ended => return Ok(false),
            SessionState::Setup => return Err(Rejection::NoActiveQuestion),
            SessionState::GameOver => return Err(Rejection::GameOver),
        }
        let Some(session) = self.current.as_ref() else {
            return Err(Rejection::NoActiveQuestion);
        };

        let generation = session.timer;
        let question_id = session.question_id;
        let presses_so_far = session.log.summaries();

        info!(question_id, presses = presses_so_far.len(), "Question ended");
        self.state = SessionState::Ended;
        self.effects.push_back(Effect::CancelTimer { generation });
        let nobody_buzzed = presses_so_far.is_empty();
        self.send(CommandType::Disarm, None);
        self.emit(Event::QuestionEnded { question_id, presses_so_far });

        // Nothing to evaluate, so the slot is free again.
        if nobody_buzzed {
            self.resolve(None);
        }
        Ok(true)
    }

    /// Automatic end for timer `generation`.
    ///
    /// Returns whether the timer ended the question. A timer from an earlier
    /// question, or one that lost the race to a manual end, is ignored.
    pub fn timer_expired(&mut self, generation: u64) -> bool {
        let current = self.current.as_ref().map(|s| s.timer);
        if self.state != SessionState::Active || current != Some(generation) {
            debug!(generation, ?current, state = %self.state, "Ignoring stale question timer");
            return false;
        }
        self.end().unwrap_or(false)
    }

    /// Arbitrate a press received at `received_at`.
    pub fn try_accept(
        &mut self,
        device_id: DeviceId,
        device_timestamp: Option<u32>,
        received_at: Instant,
    ) -> Result<PressSummary, Rejection> {
        if self.state != SessionState::Active {
            return Err(Rejection::NoActiveQuestion);
        }
        let Some(session) = self.current.as_mut() else {
            return Err(Rejection::NoActiveQuestion);
        };

        let group_id = self.roster.resolve(&device_id);
        let started_at = session.started_at;
        let press = session.log.accept(group_id, device_id, device_timestamp, received_at, started_at)?.summary();

        info!(
            group_id = %press.group_id,
            device_id = %press.device_id,
            position = press.position,
            delta_ms = press.delta_ms,
            "Buzz accepted"
        );

        if let Some(address) = press.device_id.address() {
            self.send(CommandType::Disarm, Some(address));
        }
        self.emit(Event::BuzzPressAccepted {
            group_id: press.group_id.clone(),
            device_id: press.device_id.clone(),
            position: press.position,
            delta_ms: press.delta_ms,
        });
        if press.position == 1 {
            self.emit(Event::FirstBuzz { group_id: press.group_id.clone(), device_id: press.device_id.clone() });
        }
        Ok(press)
    }

    /// Judge the earliest press still waiting.
    pub fn evaluate(&mut self, is_correct: bool) -> Result<Evaluation, Rejection> {
        match self.state {
            SessionState::Ended => {}
            SessionState::Active => return Err(Rejection::QuestionNotEnded),
            SessionState::Setup => return Err(Rejection::NothingToEvaluate),
            SessionState::GameOver => return Err(Rejection::GameOver),
        }
        let time_based = self.time_based_scoring;
        let Some(session) = self.current.as_mut() else {
            return Err(Rejection::NothingToEvaluate);
        };

        let time_limit_ms = session.time_limit.as_millis() as u64;
        let original_points = session.original_points;
        let Some(press) = session.log.next_pending_mut() else {
            return Err(Rejection::NothingToEvaluate);
        };

        let points = match (is_correct, time_based) {
            (false, _) => 0,
            (true, true) => time_decayed_points(original_points, time_limit_ms, press.delta_ms),
            (true, false) => original_points,
        };
        press.evaluated = true;
        press.is_correct = Some(is_correct);
        press.points_awarded = Some(points);

        let group_id = press.group_id.clone();
        let device_id = press.device_id.clone();
        let question_resolved = is_correct || session.log.pending() == 0;

        info!(group_id = %group_id, is_correct, points, question_resolved, "Answer evaluated");

        let feedback = if is_correct { CommandType::CorrectAnswerFeedback } else { CommandType::WrongAnswerFeedback };
        if let Some(address) = device_id.address() {
            self.send(feedback, Some(address));
        }
        self.emit(Event::AnswerEvaluated {
            group_id: group_id.clone(),
            is_correct,
            points_awarded: points,
            question_resolved,
        });

        if is_correct {
            let total = self.scores.entry(group_id.clone()).or_insert(0);
            *total += points;
            let total = *total;
            self.emit(Event::ScoreChanged { group_id: group_id.clone(), total });
            self.resolve(Some(group_id.clone()));
        } else if question_resolved {
            self.resolve(None);
        }

        Ok(Evaluation { group_id, device_id, is_correct, points_awarded: points, question_resolved })
    }

    /// Close the question without awarding anything.
    pub fn give_up(&mut self) -> Result<(), Rejection> {
        match self.state {
            SessionState::Active => {
                self.end()?;
            }
            SessionState::Ended => {}
            SessionState::Setup => return Err(Rejection::NoActiveQuestion),
            SessionState::GameOver => return Err(Rejection::GameOver),
        }
        self.resolve(None);
        Ok(())
    }

    fn resolve(&mut self, winner: Option<GroupId>) {
        if let Some(session) = self.current.take() {
            info!(question_id = session.question_id, winner = ?winner, "Question resolved");
            self.emit(Event::QuestionResolved { question_id: session.question_id, winner });
        }
        self.state = SessionState::Setup;
    }

    /// Discard the current question, if any, and return to `Setup`.
    pub fn reset(&mut self) -> Result<(), Rejection> {
        self.ensure_not_over()?;
        if let Some(session) = self.current.take() {
            info!(question_id = session.question_id, state = %self.state, "Question aborted");
            self.effects.push_back(Effect::CancelTimer { generation: session.timer });
            if self.state == SessionState::Active {
                self.send(CommandType::Disarm, None);
            }
            self.emit(Event::QuestionAborted { question_id: session.question_id });
        }
        self.state = SessionState::Setup;
        Ok(())
    }

    /// Close the game for good.
    pub fn finish_game(&mut self) -> Result<(), Rejection> {
        match self.state {
            SessionState::Setup => {}
            SessionState::Active | SessionState::Ended => return Err(Rejection::QuestionAlreadyActive),
            SessionState::GameOver => return Err(Rejection::GameOver),
        }
        info!(game_id = self.game_id, "Game over");
        self.state = SessionState::GameOver;
        self.send(CommandType::EndRound, None);
        let scores = self.scores();
        self.emit(Event::GameOver { scores });
        Ok(())
    }

    /// Arm specific devices, or every device when `devices` is empty.
    ///
    /// Returns the number of commands queued.
    pub fn arm(&mut self, devices: &[DeviceId]) -> Result<usize, Rejection> {
        self.ensure_not_over()?;
        if devices.is_empty() {
            self.send(CommandType::Arm, None);
            return Ok(1);
        }
        let addresses: Vec<u8> = devices.iter().filter_map(DeviceId::address).collect();
        for address in &addresses {
            self.send(CommandType::Arm, Some(*address));
        }
        Ok(addresses.len())
    }

    pub fn disarm_all(&mut self) {
        self.send(CommandType::Disarm, None);
    }

    /// Light a device's correct/wrong indicator.
    ///
    /// Returns `false` for devices without a serial address.
    pub fn feedback(&mut self, device: &DeviceId, correct: bool) -> bool {
        let kind = if correct { CommandType::CorrectAnswerFeedback } else { CommandType::WrongAnswerFeedback };
        match device.address() {
            Some(address) => {
                self.send(kind, Some(address));
                true
            }
            None => false,
        }
    }

    pub fn request_status(&mut self) {
        self.send(CommandType::StatusRequest, None);
    }

    pub fn test_devices(&mut self) {
        self.send(CommandType::Test, None);
    }
}
