//! Lifecycle state machine.
//!
//! A pure machine: `(state, event) -> (state, action)`. It performs no I/O,
//! reads no clocks, and holds no locks; the runtime driver interprets the
//! emitted actions. The machine tracks only the shape of handler
//! initialization (succeeded or failed); the driver owns the actual handler
//! and error values.

use thiserror::Error;

/// Result of handler construction, as far as the machine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerInit {
    /// The handler was constructed.
    Succeeded,
    /// Construction failed; the failure must be reported to the platform.
    Failed,
}

/// Sub-state while the runtime is serving invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// A `GET next` request is outstanding.
    WaitingForNext,
    /// The handler is executing the named invocation.
    RunningHandler {
        /// Request being handled.
        request_id: String,
    },
    /// The result for the named invocation is being posted.
    ReportingResult {
        /// Request being reported.
        request_id: String,
    },
}

/// Lifecycle state of the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Constructed; no connection, no handler.
    Initialized,
    /// Transport connect and handler construction are racing.
    Starting {
        /// Outcome of handler construction, once known.
        handler: Option<HandlerInit>,
        /// Whether the transport has connected.
        connected: bool,
    },
    /// Connected with a live handler.
    Running(Phase),
    /// Handler construction failed after connect; telling the platform.
    ReportingInitError,
    /// Closing the transport intentionally.
    ShuttingDown,
    /// Terminal.
    Shutdown,
}

/// Events fed into the machine by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin startup.
    Connect,
    /// The transport connected.
    Connected,
    /// Handler construction finished.
    HandlerInit {
        /// Whether construction succeeded.
        ok: bool,
    },
    /// The platform delivered an invocation.
    Next {
        /// Its request ID.
        request_id: String,
    },
    /// The handler (and its task scope) finished.
    InvocationDone,
    /// The report POST completed (or was abandoned after a logged
    /// transport failure).
    Reported,
    /// Shutdown was requested.
    Close,
    /// The transport closed as instructed.
    TransportClosed,
    /// The transport failed.
    TransportError,
}

/// Actions the driver must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport and start constructing the handler.
    OpenTransport,
    /// Issue `GET invocation/next`.
    SendNextRequest,
    /// Invoke the handler for the named request.
    InvokeHandler {
        /// Request to handle.
        request_id: String,
    },
    /// POST the response or error for the named request.
    ReportResult {
        /// Request to report.
        request_id: String,
    },
    /// POST the initialization error.
    ReportInitError,
    /// Close the transport.
    CloseTransport,
    /// Nothing to do yet; keep waiting for the next event.
    Wait,
    /// The machine is in its terminal state.
    End,
}

/// An event arrived in a state that cannot accept it.
///
/// This is a protocol violation between driver and machine; the driver
/// treats it as unrecoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal lifecycle transition: {event:?} in state {state:?}")]
pub struct IllegalTransition {
    /// State the machine was in.
    pub state: State,
    /// Event that could not be accepted.
    pub event: Event,
}

/// The lifecycle machine.
#[derive(Debug)]
pub struct Machine {
    state: State,
    shutdown_pending: bool,
    /// Invocations left before bounded shutdown; `None` means unbounded.
    remaining: Option<u64>,
}

impl Machine {
    /// Creates a machine, optionally bounded to `max_invocations`
    /// invocations. A bound of zero means unbounded.
    pub fn new(max_invocations: Option<u64>) -> Self {
        Self {
            state: State::Initialized,
            shutdown_pending: false,
            remaining: max_invocations.filter(|&n| n > 0),
        }
    }

    /// Current state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Whether a shutdown request is parked behind the current invocation.
    pub fn shutdown_pending(&self) -> bool {
        self.shutdown_pending
    }

    /// Applies `event`, advancing the state and returning the action the
    /// driver must execute.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] for any (state, event) pair outside
    /// the protocol; such a pair is unrecoverable.
    pub fn handle(&mut self, event: Event) -> Result<Action, IllegalTransition> {
        let (next, action) = match (&self.state, event) {
            (State::Initialized, Event::Connect) => (
                State::Starting {
                    handler: None,
                    connected: false,
                },
                Action::OpenTransport,
            ),

            (
                State::Starting {
                    handler: Some(HandlerInit::Succeeded),
                    connected: false,
                },
                Event::Connected,
            ) => (State::Running(Phase::WaitingForNext), Action::SendNextRequest),
            (
                State::Starting {
                    handler: Some(HandlerInit::Failed),
                    connected: false,
                },
                Event::Connected,
            ) => (State::ReportingInitError, Action::ReportInitError),
            (
                State::Starting {
                    handler: None,
                    connected: false,
                },
                Event::Connected,
            ) => (
                State::Starting {
                    handler: None,
                    connected: true,
                },
                Action::Wait,
            ),

            (
                State::Starting {
                    handler: None,
                    connected: false,
                },
                Event::HandlerInit { ok },
            ) => (
                State::Starting {
                    handler: Some(if ok {
                        HandlerInit::Succeeded
                    } else {
                        HandlerInit::Failed
                    }),
                    connected: false,
                },
                Action::Wait,
            ),
            (
                State::Starting {
                    handler: None,
                    connected: true,
                },
                Event::HandlerInit { ok: true },
            ) => (State::Running(Phase::WaitingForNext), Action::SendNextRequest),
            (
                State::Starting {
                    handler: None,
                    connected: true,
                },
                Event::HandlerInit { ok: false },
            ) => (State::ReportingInitError, Action::ReportInitError),

            (State::Running(Phase::WaitingForNext), Event::Next { request_id }) => {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                (
                    State::Running(Phase::RunningHandler {
                        request_id: request_id.clone(),
                    }),
                    Action::InvokeHandler { request_id },
                )
            }

            (State::Running(Phase::RunningHandler { request_id }), Event::InvocationDone) => {
                let request_id = request_id.clone();
                (
                    State::Running(Phase::ReportingResult {
                        request_id: request_id.clone(),
                    }),
                    Action::ReportResult { request_id },
                )
            }

            (State::Running(Phase::ReportingResult { .. }), Event::Reported) => {
                if self.remaining == Some(0) || self.shutdown_pending {
                    (State::ShuttingDown, Action::CloseTransport)
                } else {
                    (State::Running(Phase::WaitingForNext), Action::SendNextRequest)
                }
            }

            (State::ReportingInitError, Event::Reported) => {
                (State::ShuttingDown, Action::CloseTransport)
            }

            (State::Running(Phase::WaitingForNext), Event::Close) => {
                (State::ShuttingDown, Action::CloseTransport)
            }
            (State::Running(busy), Event::Close) => {
                self.shutdown_pending = true;
                (State::Running(busy.clone()), Action::Wait)
            }
            // Shutdown requested mid-startup: abandon the cold start. No
            // invocation is in flight, so there is nothing to report.
            (State::Starting { .. }, Event::Close) => {
                (State::ShuttingDown, Action::CloseTransport)
            }

            (State::ShuttingDown | State::Running(Phase::WaitingForNext), Event::TransportClosed) => {
                (State::Shutdown, Action::End)
            }

            (State::Shutdown, event) => {
                return Err(IllegalTransition {
                    state: self.state.clone(),
                    event,
                });
            }
            (_, Event::TransportError) => (State::ShuttingDown, Action::CloseTransport),

            (_, event) => {
                return Err(IllegalTransition {
                    state: self.state.clone(),
                    event,
                });
            }
        };

        self.state = next;
        Ok(action)
    }
}
