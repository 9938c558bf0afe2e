//! Hierarchical machine state machine.
//!
//! Two levels: the outer lifecycle
//! `initial → running ↔ fault → terminated`, and inside `running` the
//! task layer `no_task → {spraying, tending, cleaning} → no_task`,
//! each task stepping `idle → preparation → ongoing → completed`.
//! Inside `fault` a manual jog sub-state is reachable from idle.
//!
//! Events arrive through the priority queue: a fault trigger posted at
//! any time is processed before every ordinary event that was already
//! waiting. Task bodies run on the machine thread and poll the fault
//! flag between steps, so a pending fault first cancels the body, then
//! wins the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use terra_common::config::Config;
use terra_common::consts::{input, pwm};
use terra_common::state::SharedState;
use terra_common::time::sleep_for_ms;
use terra_common::types::{AxisId, Liquid, TaskKind};
use terra_hal::backend::Backend;
use terra_hal::gpio::Level;
use terra_motion::Movement;

use crate::action;
use crate::context::Context;
use crate::devices::DeviceSet;
use crate::error::MachineError;
use crate::event::{Event, EventQueue, EventSink};
use crate::guard;
use crate::liquid::LiquidRefilling;
use crate::listener::{
    FaultListener, Listener, RefillListener, RestartFaultListener, TaskTimeoutListener,
};

/// Height-input poll period while waiting for a task, ms.
const TASK_POLL_PERIOD_MS: u64 = 500;

/// Progress of one task through its sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Idle,
    Preparation,
    Ongoing,
    Completed,
}

/// Inner state while the machine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NoTask,
    Task { kind: TaskKind, phase: TaskPhase },
}

/// Inner state while the machine is faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPhase {
    Idle,
    Manual,
}

/// Full machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Initial,
    Running(RunState),
    Fault(FaultPhase),
    Terminated,
}

/// Posting/observing handle for other threads.
#[derive(Clone)]
pub struct MachineHandle {
    sink: EventSink,
    state: Arc<SharedState>,
}

impl MachineHandle {
    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Request an orderly shutdown.
    pub fn stop(&self) {
        self.sink.post(Event::Stop);
    }
}

/// The machine: state, event queue, listeners, and task dispatch.
pub struct Machine {
    config: Arc<Config>,
    backend: Arc<dyn Backend>,
    state: Arc<SharedState>,
    queue: Arc<EventQueue>,
    current: MachineState,
    machine_ready: bool,
    ctx: Option<Arc<Context>>,
    listeners: Vec<Box<dyn Listener>>,
    pending_chain: VecDeque<Event>,
    poll_generation: Arc<AtomicU64>,
    poller: Option<JoinHandle<()>>,
}

impl Machine {
    pub fn new(config: Arc<Config>, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            state: Arc::new(SharedState::new()),
            queue: EventQueue::new(),
            current: MachineState::Initial,
            machine_ready: false,
            ctx: None,
            listeners: Vec::new(),
            pending_chain: VecDeque::new(),
            poll_generation: Arc::new(AtomicU64::new(0)),
            poller: None,
        }
    }

    /// Cross-thread handle; valid before and after `run`.
    pub fn handle(&self) -> MachineHandle {
        MachineHandle {
            sink: EventSink::new(Arc::clone(&self.queue)),
            state: Arc::clone(&self.state),
        }
    }

    #[inline]
    pub fn machine_state(&self) -> MachineState {
        self.current
    }

    /// Whether every device came up during start.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.machine_ready
    }

    fn ctx(&self) -> &Arc<Context> {
        self.ctx.as_ref().expect("machine started")
    }

    /// Bring the machine up: devices, movement, listeners, first home.
    pub fn start(&mut self) -> Result<(), MachineError> {
        info!(name = %self.config.general.name, "starting machine");

        let devices = Arc::new(DeviceSet::build(self.backend.as_ref(), &self.config)?);
        devices.shift_register().write_all(Level::Low)?;

        let movement = Arc::new(
            Movement::builder(Arc::clone(&self.config), Arc::clone(&self.state))
                .axis(
                    AxisId::X,
                    devices.stepper(AxisId::X),
                    devices.input(input::LIMIT_SWITCH_X)?,
                )
                .axis(
                    AxisId::Y,
                    devices.stepper(AxisId::Y),
                    devices.input(input::LIMIT_SWITCH_Y)?,
                )
                .axis(
                    AxisId::Z,
                    devices.stepper(AxisId::Z),
                    devices.input(input::LIMIT_SWITCH_Z)?,
                )
                .finger(devices.pwm(pwm::FINGER)?)
                .build()?,
        );

        let ctx = Arc::new(Context {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            devices: Arc::clone(&devices),
            movement,
            sink: EventSink::new(Arc::clone(&self.queue)),
        });

        action::reset_task_state(&ctx);

        let refilling = Arc::new(LiquidRefilling::new(
            Arc::clone(&self.config),
            Arc::clone(&self.state),
            devices,
        ));

        self.listeners = vec![
            Box::new(FaultListener::new(Arc::clone(&ctx))),
            Box::new(TaskTimeoutListener::new(Arc::clone(&ctx))),
            Box::new(RestartFaultListener::new(Arc::clone(&ctx))),
            Box::new(RefillListener::new(
                Arc::clone(&ctx),
                Liquid::Water,
                Arc::clone(&refilling),
            )),
            Box::new(RefillListener::new(
                Arc::clone(&ctx),
                Liquid::Disinfectant,
                refilling,
            )),
        ];
        for listener in &mut self.listeners {
            listener.start();
        }

        self.ctx = Some(ctx);
        self.machine_ready = true;
        self.current = MachineState::Running(RunState::NoTask);
        self.enter_no_task();
        Ok(())
    }

    /// Process events until terminated. Consumes the machine.
    pub fn run(mut self) -> Result<(), MachineError> {
        if self.current == MachineState::Initial {
            if let Err(error) = self.start() {
                self.terminate();
                return Err(error);
            }
        }

        while self.current != MachineState::Terminated {
            if let Some(event) = self.queue.pop(Duration::from_millis(200)) {
                self.step(event);
            } else if !self.state.running() {
                self.terminate();
            }
        }
        Ok(())
    }

    /// Drain whatever is queued right now; test hook for synchronous
    /// scenario drives.
    pub fn drain(&mut self) {
        while let Some(event) = self.queue.pop(Duration::from_millis(50)) {
            self.step(event);
            if self.current == MachineState::Terminated {
                break;
            }
        }
    }

    /// Process one event against the current state.
    ///
    /// Unmatched events are dropped, except task starts arriving while
    /// a task runs, which are held back and replayed once the machine
    /// is back in `no_task`. That is what chains tending behind
    /// spraying when the tray presents at the shared height.
    pub fn step(&mut self, event: Event) -> MachineState {
        use MachineState::*;

        match (self.current, event) {
            (Initial, Event::Start) => {
                // Ignored here: `run` performs startup before the loop.
            }
            (Initial, Event::Stop) => {
                self.current = Terminated;
            }

            (Running(_), Event::Stop) | (Fault(_), Event::Stop) => {
                if self.current == Fault(FaultPhase::Manual) {
                    action::fault_manual_exit(self.ctx());
                }
                self.terminate();
            }

            (Running(_), Event::FaultTrigger) if guard::fault(&self.state) => {
                self.cancel_poller();
                self.pending_chain.clear();
                action::fault(self.ctx());
                self.current = Fault(FaultPhase::Idle);
            }

            (Fault(FaultPhase::Idle), Event::FaultManual) => {
                action::fault_manual_enter(self.ctx());
                self.current = Fault(FaultPhase::Manual);
            }

            (Fault(phase), Event::FaultRestart) => {
                if phase == FaultPhase::Manual {
                    action::fault_manual_exit(self.ctx());
                }
                action::restart(self.ctx());
                self.current = Running(RunState::NoTask);
                self.enter_no_task();
            }

            (Fault(FaultPhase::Manual), _) => {
                // Any other event drops manual mode back to idle.
                action::fault_manual_exit(self.ctx());
                self.current = Fault(FaultPhase::Idle);
            }

            (Running(RunState::NoTask), Event::TaskStart(kind)) => {
                self.cancel_poller();
                info!("entering {kind} mode");
                self.current = Running(RunState::Task {
                    kind,
                    phase: TaskPhase::Preparation,
                });
                action::preparation(self.ctx(), kind);
            }

            (
                Running(RunState::Task {
                    kind,
                    phase: TaskPhase::Preparation,
                }),
                Event::TaskRun(run_kind),
            ) if run_kind == kind => {
                self.current = Running(RunState::Task {
                    kind,
                    phase: TaskPhase::Ongoing,
                });
                let ctx = Arc::clone(self.ctx());
                match kind {
                    TaskKind::Spraying => action::spraying_job(&ctx),
                    TaskKind::Tending => action::tending_job(&ctx),
                    TaskKind::Cleaning => action::cleaning_job(&ctx),
                }

                if guard::task_completed(&self.state, kind) {
                    self.current = Running(RunState::Task {
                        kind,
                        phase: TaskPhase::Completed,
                    });
                    match kind {
                        TaskKind::Spraying => action::spraying_complete(&ctx),
                        TaskKind::Tending => action::tending_complete(&ctx),
                        TaskKind::Cleaning => action::cleaning_complete(&ctx),
                    }
                }
                // An interrupted job leaves the task ongoing; the
                // fault trigger already queued will take it from here.
            }

            (Running(RunState::Task { .. }), Event::TaskComplete) => {
                self.current = Running(RunState::NoTask);
                self.enter_no_task();
            }

            (Running(RunState::Task { .. }), Event::TaskStart(next)) => {
                debug!("deferring {next} start until no_task");
                self.pending_chain.push_back(Event::TaskStart(next));
            }

            (state, event) => {
                debug!(?state, ?event, "event ignored in current state");
            }
        }

        self.current
    }

    /// Entry work for `no_task`, then either replay a deferred chain
    /// start or watch the PLC height inputs.
    fn enter_no_task(&mut self) {
        let ctx = Arc::clone(self.ctx());
        action::no_task_entry(&ctx);
        if self.state.fault() {
            return;
        }

        if let Some(event) = self.pending_chain.pop_front() {
            ctx.sink.post(event);
            return;
        }

        self.spawn_height_poller();
    }

    fn spawn_height_poller(&mut self) {
        self.cancel_poller();
        let generation = self.poll_generation.load(Ordering::SeqCst);
        let ctx = Arc::clone(self.ctx());
        let generations = Arc::clone(&self.poll_generation);

        let handle = std::thread::Builder::new()
            .name("height-poller".into())
            .spawn(move || {
                while generations.load(Ordering::SeqCst) == generation
                    && ctx.state.running()
                    && !ctx.state.fault()
                {
                    if guard::height_spraying_tending(&ctx.devices) {
                        info!("tray at spraying/tending height");
                        ctx.sink.post(Event::TaskStart(TaskKind::Spraying));
                        ctx.sink.post(Event::TaskStart(TaskKind::Tending));
                        return;
                    }
                    if guard::height_cleaning(&ctx.devices) {
                        info!("tray at cleaning height");
                        ctx.sink.post(Event::TaskStart(TaskKind::Cleaning));
                        return;
                    }
                    sleep_for_ms(TASK_POLL_PERIOD_MS);
                }
            })
            .expect("spawn height poller");
        self.poller = Some(handle);
    }

    fn cancel_poller(&mut self) {
        self.poll_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.poller.take() {
            let _ = handle.join();
        }
    }

    fn terminate(&mut self) {
        self.cancel_poller();
        if let Some(ctx) = &self.ctx {
            action::stop(ctx);
        } else {
            self.state.set_running(false);
        }
        for listener in &mut self.listeners {
            listener.stop();
        }
        self.listeners.clear();
        self.current = MachineState::Terminated;
        info!("machine terminated");
    }
}
