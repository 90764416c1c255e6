//! Single-owner actor around [`SleepEngine`].
//!
//! Producers (one per physical or network source) hold cloned
//! [`EngineHandle`]s and send [`Command`]s over one unbounded queue. A single
//! thread owns the engine, applies commands in arrival order and, when a tick
//! period is configured, evaluates on its own timer. Buffers are never shared,
//! so no locks are needed.
//!
//! ```text
//! producer ─┐
//! producer ─┼─► Command queue ─► engine thread ─► EngineOutput queue ─► consumer
//! timer ────┘
//! ```
//!
//! Cancellation is dropping every handle or sending [`Command::Shutdown`]; no
//! in-flight work needs unwinding.

use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{self, select, Receiver, Sender};
use tracing::{debug, info};

use crate::engine::SleepEngine;
use crate::error::ActorError;
use crate::types::{ConfirmedEpoch, Row, Sample};

/// Message from a producer to the engine thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Re-derive the band layout from channel labels.
    Configure(Vec<String>),
    Push(Sample),
    /// Evaluate at the given time (seconds on the producers' clock).
    Evaluate(f64),
    Shutdown,
}

/// Message from the engine thread to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Row(Row),
    Confirmed(ConfirmedEpoch),
}

/// Actor settings.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// Internal evaluation period; `None` evaluates only on [`Command::Evaluate`].
    pub tick: Option<Duration>,
    pub thread_name: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            tick: None,
            thread_name: "sleep-engine".to_string(),
        }
    }
}

/// Cloneable producer handle.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: Sender<Command>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<(), ActorError> {
        self.commands.send(command).map_err(|_| ActorError::Disconnected)
    }

    pub fn configure<S: AsRef<str>>(&self, labels: &[S]) -> Result<(), ActorError> {
        let labels = labels.iter().map(|l| l.as_ref().to_string()).collect();
        self.send(Command::Configure(labels))
    }

    pub fn push(&self, sample: Sample) -> Result<(), ActorError> {
        self.send(Command::Push(sample))
    }

    pub fn evaluate(&self, now: f64) -> Result<(), ActorError> {
        self.send(Command::Evaluate(now))
    }

    /// Asks the engine thread to stop after the commands already queued.
    pub fn shutdown(&self) -> Result<(), ActorError> {
        self.send(Command::Shutdown)
    }
}

/// A running engine actor.
#[derive(Debug)]
pub struct EngineActor {
    pub handle: EngineHandle,
    pub outputs: Receiver<EngineOutput>,
    thread: JoinHandle<SleepEngine>,
}

impl EngineActor {
    /// Waits for the engine thread to stop and returns the engine.
    ///
    /// The thread stops on [`Command::Shutdown`] or once every handle is dropped.
    pub fn join(self) -> Result<SleepEngine, ActorError> {
        let EngineActor { handle, thread, .. } = self;
        drop(handle);
        thread.join().map_err(|_| ActorError::Panicked)
    }
}

/// Starts the engine thread.
pub fn spawn(engine: SleepEngine, config: ActorConfig) -> Result<EngineActor, ActorError> {
    let (command_tx, command_rx) = channel::unbounded();
    let (output_tx, output_rx) = channel::unbounded();
    let tick = config.tick;

    let thread = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || run(engine, command_rx, output_tx, tick))
        .map_err(|err| ActorError::Spawn(err.to_string()))?;

    info!(thread = %config.thread_name, tick = ?tick, "engine actor started");
    Ok(EngineActor {
        handle: EngineHandle { commands: command_tx },
        outputs: output_rx,
        thread,
    })
}

fn run(
    mut engine: SleepEngine,
    commands: Receiver<Command>,
    outputs: Sender<EngineOutput>,
    tick: Option<Duration>,
) -> SleepEngine {
    let ticker = match tick {
        Some(period) => channel::tick(period),
        None => channel::never(),
    };

    loop {
        select! {
            recv(commands) -> msg => match msg {
                Ok(Command::Push(sample)) => engine.push_sample(sample),
                Ok(Command::Configure(labels)) => engine.configure(labels.as_slice()),
                Ok(Command::Evaluate(now)) => evaluate_and_emit(&mut engine, now, &outputs),
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => evaluate_and_emit(&mut engine, wall_clock_secs(), &outputs),
        }
    }

    debug!("engine actor stopped");
    engine
}

fn evaluate_and_emit(engine: &mut SleepEngine, now: f64, outputs: &Sender<EngineOutput>) {
    let Some(row) = engine.evaluate(now) else {
        return;
    };
    if outputs.send(EngineOutput::Row(row)).is_err() {
        debug!("output receiver dropped");
        return;
    }
    if let Some(confirmed) = engine.confirmed_stage(now) {
        if outputs.send(EngineOutput::Confirmed(confirmed)).is_err() {
            debug!("output receiver dropped");
        }
    }
}

/// Seconds since the Unix epoch.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
