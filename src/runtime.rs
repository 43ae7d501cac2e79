//! Runtime driver.
//!
//! Composes the Runtime API client, the lifecycle machine, and the handler:
//! the machine decides, the driver executes. All I/O and all ownership of
//! the handler, the init error, and the in-flight invocation live here.

use crate::client::ApiClient;
use crate::config::Config;
use crate::context::{Context, TaskScope};
use crate::error::{BoxError, Error};
use crate::handler::Handler;
use crate::invocation::Invocation;
use crate::lifecycle::{Action, Event, Machine, State};
use crate::response::Response;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Builder for the runtime driver.
///
/// # Examples
///
/// ```no_run
/// use lambda_runtime_core::{handler_fn, Adapter, JsonDecoder, JsonEncoder, Runtime};
///
/// #[derive(serde::Deserialize)]
/// struct Request { n: i64 }
///
/// #[derive(serde::Serialize)]
/// struct Reply { result: i64 }
///
/// # async fn example() -> Result<(), lambda_runtime_core::Error> {
/// let runtime = Runtime::builder().build()?;
/// runtime
///     .run(async {
///         let handler = handler_fn(|request: Request, _ctx| async move {
///             Ok(Reply { result: request.n * request.n })
///         });
///         Ok(Adapter::new(handler, JsonDecoder, JsonEncoder))
///     })
///     .await
/// # }
/// ```
#[derive(Debug, Default)]
#[must_use = "builders do nothing unless .build() is called"]
pub struct RuntimeBuilder {
    config: Option<Config>,
    max_invocations: Option<u64>,
    cancellation_token: Option<CancellationToken>,
    handle_sigterm: bool,
}

impl RuntimeBuilder {
    /// Creates a builder with environment-derived configuration and
    /// SIGTERM handling enabled.
    pub fn new() -> Self {
        Self {
            config: None,
            max_invocations: None,
            cancellation_token: None,
            handle_sigterm: true,
        }
    }

    /// Overrides the configuration instead of reading the environment.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Bounds the runtime to `max` invocations, after which it reports the
    /// last result and shuts down. Zero means unbounded.
    pub fn max_invocations(mut self, max: u64) -> Self {
        self.max_invocations = Some(max);
        self
    }

    /// Supplies an external cancellation token. Cancelling it requests a
    /// graceful shutdown: the current invocation, if any, completes and
    /// reports first. Cancelling during startup abandons the cold start.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Disables translating SIGTERM into cancellation.
    pub fn no_sigterm_handler(mut self) -> Self {
        self.handle_sigterm = false;
        self
    }

    /// Builds the runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no explicit configuration was
    /// given and the environment is malformed.
    pub fn build(self) -> Result<Runtime, Error> {
        let config = match self.config {
            Some(config) => config,
            None => Config::from_env()?,
        };
        Ok(Runtime {
            config,
            max_invocations: self.max_invocations,
            cancel: self.cancellation_token.unwrap_or_default(),
            handle_sigterm: self.handle_sigterm,
        })
    }
}

/// The runtime driver.
pub struct Runtime {
    config: Config,
    max_invocations: Option<u64>,
    cancel: CancellationToken,
    handle_sigterm: bool,
}

impl Runtime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime with explicit configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            max_invocations: None,
            cancel: CancellationToken::new(),
            handle_sigterm: true,
        }
    }

    /// A handle to the cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the runtime until shutdown.
    ///
    /// `init` constructs the handler; it runs concurrently with the
    /// transport connect, and its failure is reported to the platform as an
    /// initialization error before this method returns it.
    ///
    /// # Errors
    ///
    /// Returns the init failure, a fatal protocol violation, or the
    /// transport error that ended the run loop. A bounded or cancelled run
    /// that drains normally returns `Ok(())`.
    pub async fn run<H, I>(self, init: I) -> Result<(), Error>
    where
        H: Handler,
        I: Future<Output = Result<H, BoxError>>,
    {
        let mut client = ApiClient::new(&self.config);
        let mut machine = Machine::new(self.max_invocations);
        let cancel = self.cancel;
        if self.handle_sigterm {
            spawn_sigterm_listener(cancel.clone());
        }

        tracing::info!(address = %self.config.address(), "starting runtime");

        let mut handler: Option<H> = None;
        let mut init_error: Option<Error> = None;

        let mut action = transition(&mut machine, Event::Connect)?;
        if action != Action::OpenTransport {
            return Err(driver_desync(&action));
        }

        let mut close_sent = false;

        // Startup: the transport connect and handler construction race;
        // the machine accepts their completions in either order. A
        // shutdown request here abandons the cold start.
        action = {
            let connect = client.connect();
            tokio::pin!(connect);
            tokio::pin!(init);
            let mut connect_pending = true;
            let mut init_pending = true;

            loop {
                let act = tokio::select! {
                    biased;
                    _ = cancel.cancelled(), if !close_sent => {
                        close_sent = true;
                        tracing::info!("shutdown requested during startup");
                        transition(&mut machine, Event::Close)?
                    }
                    result = &mut connect, if connect_pending => {
                        connect_pending = false;
                        result?;
                        transition(&mut machine, Event::Connected)?
                    }
                    result = &mut init, if init_pending => {
                        init_pending = false;
                        let ok = match result {
                            Ok(h) => {
                                handler = Some(h);
                                true
                            }
                            Err(cause) => {
                                init_error = Some(Error::HandlerInitFailure(cause));
                                false
                            }
                        };
                        transition(&mut machine, Event::HandlerInit { ok })?
                    }
                };
                if act != Action::Wait {
                    break act;
                }
            }
        };

        let mut pending: Option<(Invocation, Bytes)> = None;
        let mut outcome: Option<Result<Response, Error>> = None;
        let mut fatal: Option<Error> = None;

        loop {
            action = match action {
                Action::SendNextRequest => {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled(), if !close_sent => {
                            close_sent = true;
                            Event::Close
                        }
                        result = client.next_invocation() => match result {
                            Ok((invocation, payload)) => {
                                let request_id = invocation.request_id.clone();
                                pending = Some((invocation, payload));
                                Event::Next { request_id }
                            }
                            Err(Error::Transport(cause)) => {
                                tracing::error!(error = %cause, "polling for next invocation failed");
                                fatal = Some(Error::Transport(cause));
                                Event::TransportError
                            }
                            Err(error) => return Err(error),
                        }
                    };
                    transition(&mut machine, event)?
                }

                Action::InvokeHandler { request_id } => {
                    let (invocation, payload) = pending
                        .take()
                        .ok_or_else(|| driver_desync(&Action::InvokeHandler {
                            request_id: request_id.clone(),
                        }))?;
                    let handler = handler
                        .as_mut()
                        .ok_or_else(|| driver_desync(&Action::InvokeHandler { request_id }))?;

                    let scope = TaskScope::new();
                    let ctx = Context::new(invocation, Arc::clone(&scope));
                    let span = ctx.span().clone();

                    let result = handler.call(payload, ctx).instrument(span).await;
                    scope.drain().await;
                    outcome = Some(result);

                    if cancel.is_cancelled() && !close_sent {
                        close_sent = true;
                        let act = transition(&mut machine, Event::Close)?;
                        if act != Action::Wait {
                            return Err(driver_desync(&act));
                        }
                    }
                    transition(&mut machine, Event::InvocationDone)?
                }

                Action::ReportResult { request_id } => {
                    let result = outcome.take().ok_or_else(|| {
                        driver_desync(&Action::ReportResult {
                            request_id: request_id.clone(),
                        })
                    })?;

                    let report = match result {
                        Ok(response) => client.post_response(&request_id, response).await,
                        Err(error) => {
                            tracing::warn!(
                                %request_id,
                                error_type = error.error_type(),
                                "invocation failed"
                            );
                            client
                                .post_invocation_error(&request_id, &error.to_error_body())
                                .await
                        }
                    };

                    let event = match report {
                        Ok(()) => Event::Reported,
                        // Reporting is not retried; the platform's own
                        // retry policy takes over on the next poll.
                        Err(Error::Transport(cause)) => {
                            tracing::warn!(%request_id, error = %cause, "reporting failed, invocation abandoned");
                            Event::Reported
                        }
                        Err(Error::HandlerFailure(cause)) => {
                            tracing::warn!(%request_id, error = %cause, "response stream producer failed mid-stream");
                            Event::Reported
                        }
                        Err(error) => return Err(error),
                    };
                    transition(&mut machine, event)?
                }

                Action::ReportInitError => {
                    let error = init_error
                        .take()
                        .ok_or_else(|| driver_desync(&Action::ReportInitError))?;
                    tracing::error!(%error, "handler initialization failed");

                    match client.post_init_error(&error.to_error_body()).await {
                        Ok(()) => {}
                        Err(Error::Transport(cause)) => {
                            tracing::warn!(error = %cause, "reporting initialization error failed");
                        }
                        Err(report_error) => return Err(report_error),
                    }
                    fatal = Some(error);
                    transition(&mut machine, Event::Reported)?
                }

                Action::CloseTransport => {
                    client.close();
                    transition(&mut machine, Event::TransportClosed)?
                }

                Action::End => break,

                // OpenTransport belongs to startup and Wait never escapes
                // a transition here; seeing either means driver and
                // machine have diverged.
                other @ (Action::OpenTransport | Action::Wait) => {
                    return Err(driver_desync(&other));
                }
            };
        }

        debug_assert_eq!(machine.state(), &State::Shutdown);
        tracing::info!("runtime shut down");

        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn transition(machine: &mut Machine, event: Event) -> Result<Action, Error> {
    machine
        .handle(event)
        .map_err(|violation| Error::ProtocolViolation(violation.to_string()))
}

fn driver_desync(action: &Action) -> Error {
    Error::ProtocolViolation(format!("driver cannot execute {action:?} here"))
}

fn spawn_sigterm_listener(token: CancellationToken) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received, requesting shutdown");
                token.cancel();
            }
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
            }
        }
    });

    #[cfg(not(unix))]
    drop(token);
}
