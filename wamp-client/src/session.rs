use crate::config::SessionConfig;
use crate::correlation::{PendingRequests, Replier, Reply, RequestKind};
use crate::error::{Result, WampError};
use crate::transport::{TransportEvent, TransportLink};
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use wamp_proto::{code, uri, Codec, Dict, List, Message};

/// Depth of the command channel feeding the dispatch loop.
const COMMAND_BUFFER: usize = 64;

/// Lifecycle of one session against a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Established,
    Closing,
    Closed,
}

/// Success payload a procedure handler yields back to the caller.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    pub args: List,
    pub kwargs: Dict,
}

impl InvocationResult {
    pub fn with_args(args: List) -> Self {
        Self {
            args,
            kwargs: Dict::new(),
        }
    }
}

/// Error payload a procedure handler sends back as a WAMP ERROR.
#[derive(Debug, Clone)]
pub struct InvocationError {
    pub error: String,
    pub args: List,
    pub kwargs: Dict,
}

impl InvocationError {
    pub fn new(error_uri: impl Into<String>) -> Self {
        Self {
            error: error_uri.into(),
            args: List::new(),
            kwargs: Dict::new(),
        }
    }
}

impl From<String> for InvocationError {
    fn from(message: String) -> Self {
        Self {
            error: uri::RUNTIME_ERROR.to_string(),
            args: vec![json!(message)],
            kwargs: Dict::new(),
        }
    }
}

impl From<&str> for InvocationError {
    fn from(message: &str) -> Self {
        message.to_string().into()
    }
}

/// Handler for incoming invocations of a locally registered procedure.
/// Runs inside the dispatch loop; its outcome becomes YIELD or ERROR.
pub type CallHandler = Arc<
    dyn Fn(List, Dict) -> std::result::Result<InvocationResult, InvocationError> + Send + Sync,
>;

/// Handler invoked once per EVENT on a subscribed topic, in arrival
/// order. A returned error is logged; it never reaches the router.
pub type EventHandler = Arc<dyn Fn(List, Dict) -> std::result::Result<(), String> + Send + Sync>;

/// Operations entering the dispatch loop from application callers.
pub(crate) enum Command {
    Call {
        procedure: String,
        args: List,
        kwargs: Dict,
        options: Dict,
        replier: Replier,
    },
    Register {
        procedure: String,
        options: Dict,
        handler: CallHandler,
        replier: Replier,
    },
    Unregister {
        registration_id: u64,
        replier: Replier,
    },
    Subscribe {
        topic: String,
        options: Dict,
        handler: EventHandler,
        replier: Replier,
    },
    Unsubscribe {
        subscription_id: u64,
        replier: Replier,
    },
    Publish {
        topic: String,
        args: List,
        kwargs: Dict,
        options: Dict,
        acknowledge: bool,
        replier: Replier,
    },
    Close {
        replier: oneshot::Sender<Result<()>>,
    },
}

/// Handle to an established session. Cheap to clone; all clones feed
/// the same single-owner dispatch loop.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    info: Arc<SessionInfo>,
}

struct SessionInfo {
    session_id: u64,
    realm: String,
    details: Dict,
}

impl Session {
    /// Opens a WAMP session over an established transport link: sends
    /// HELLO, carries any CHALLENGE through the configured responder,
    /// and on WELCOME spawns the dispatch loop.
    pub async fn connect(mut link: TransportLink, config: SessionConfig) -> Result<Session> {
        let codec = config.codec.clone();

        debug!("joining realm {:?}", config.realm);
        send_message(&link.tx, codec.as_ref(), &hello(&config)).await?;

        // Authenticating: only WELCOME, ABORT or CHALLENGE may arrive.
        let (session_id, details) = loop {
            let frame = match link.rx.recv().await {
                Some(TransportEvent::Frame(frame)) => frame,
                Some(TransportEvent::Closed(reason)) => {
                    return Err(WampError::Transport(
                        reason.unwrap_or_else(|| "link lost during handshake".to_string()),
                    ))
                }
                None => {
                    return Err(WampError::Transport(
                        "transport dropped during handshake".to_string(),
                    ))
                }
            };

            match codec.decode(&frame)? {
                Message::Welcome {
                    session_id,
                    details,
                } => break (session_id, details),
                Message::Abort { details, reason } => {
                    warn!("router aborted the handshake: {}", reason);
                    return Err(WampError::AuthenticationFailed { reason, details });
                }
                Message::Challenge { auth_method, extra } => {
                    let responder = config.on_challenge.as_ref().ok_or_else(|| {
                        WampError::AuthenticationFailed {
                            reason: format!(
                                "router issued a {} challenge but no responder is configured",
                                auth_method
                            ),
                            details: extra.clone(),
                        }
                    })?;
                    let signature = responder(&auth_method, &extra)?;
                    send_message(
                        &link.tx,
                        codec.as_ref(),
                        &Message::Authenticate {
                            signature,
                            extra: Dict::new(),
                        },
                    )
                    .await?;
                }
                other => {
                    return Err(WampError::ProtocolViolation(format!(
                        "unexpected {} during handshake",
                        other.name()
                    )))
                }
            }
        };

        info!(
            "session {} established on realm {:?}",
            session_id, config.realm
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Established);

        let dispatcher = Dispatcher {
            state: SessionState::Established,
            state_tx,
            codec,
            out: link.tx,
            pending: PendingRequests::new(),
            pending_registrations: HashMap::new(),
            pending_unregistrations: HashMap::new(),
            pending_subscriptions: HashMap::new(),
            pending_unsubscriptions: HashMap::new(),
            registrations: HashMap::new(),
            subscriptions: HashMap::new(),
            close_waiters: Vec::new(),
            session_id,
        };
        tokio::spawn(dispatcher.run(command_rx, link.rx));

        Ok(Session {
            commands: command_tx,
            state: state_rx,
            info: Arc::new(SessionInfo {
                session_id,
                realm: config.realm,
                details,
            }),
        })
    }

    /// Router-assigned session identifier.
    pub fn id(&self) -> u64 {
        self.info.session_id
    }

    pub fn realm(&self) -> &str {
        &self.info.realm
    }

    /// Router-agreed roles and details from WELCOME.
    pub fn details(&self) -> &Dict {
        &self.info.details
    }

    /// False once the dispatch loop has terminated.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Current lifecycle state as last published by the dispatch loop.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Completes once the session reaches the `Closed` state for any
    /// reason: local close, router GOODBYE, link loss or violation.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        while *state.borrow() != SessionState::Closed {
            if state.changed().await.is_err() {
                break;
            }
        }
    }

    /// Sends GOODBYE and waits for the router's acknowledgement (or
    /// link loss). Pending operations fail with `SessionClosed`.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Close { replier: tx })
            .await
            .is_err()
        {
            // Loop already gone: the session is closed, which is what
            // the caller asked for.
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Issues one command into the dispatch loop and suspends until its
    /// reply slot completes.
    pub(crate) async fn request(&self, make: impl FnOnce(Replier) -> Command) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| WampError::SessionClosed)?;
        rx.await.map_err(|_| WampError::SessionClosed)?
    }
}

fn hello(config: &SessionConfig) -> Message {
    let mut details = Dict::new();
    details.insert("roles".to_string(), wamp_proto::client_roles());
    if !config.auth_methods.is_empty() {
        details.insert("authmethods".to_string(), json!(config.auth_methods));
    }
    if let Some(authid) = &config.authid {
        details.insert("authid".to_string(), json!(authid));
    }
    Message::Hello {
        realm: config.realm.clone(),
        details,
    }
}

async fn send_message(
    tx: &mpsc::Sender<Bytes>,
    codec: &dyn Codec,
    message: &Message,
) -> Result<()> {
    let frame = codec.encode(message)?;
    tx.send(frame)
        .await
        .map_err(|_| WampError::Transport("link closed".to_string()))
}

struct LocalRegistration {
    procedure: String,
    handler: CallHandler,
}

struct LocalSubscription {
    topic: String,
    handler: EventHandler,
}

/// Owns all mutable session state. Runs as a single task; every
/// mutation happens inside `run`, so the identifier-uniqueness and
/// exactly-once-resolution invariants need no further locking.
struct Dispatcher {
    state: SessionState,
    /// Mirrors `state` for observers holding a session handle.
    state_tx: watch::Sender<SessionState>,
    codec: Arc<dyn Codec>,
    out: mpsc::Sender<Bytes>,
    pending: PendingRequests,
    /// REGISTER request id -> handler awaiting REGISTERED.
    pending_registrations: HashMap<u64, LocalRegistration>,
    /// UNREGISTER request id -> registration id being removed.
    pending_unregistrations: HashMap<u64, u64>,
    /// SUBSCRIBE request id -> handler awaiting SUBSCRIBED.
    pending_subscriptions: HashMap<u64, LocalSubscription>,
    /// UNSUBSCRIBE request id -> subscription id being removed.
    pending_unsubscriptions: HashMap<u64, u64>,
    registrations: HashMap<u64, LocalRegistration>,
    subscriptions: HashMap<u64, LocalSubscription>,
    close_waiters: Vec<oneshot::Sender<Result<()>>>,
    session_id: u64,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        let mut commands_open = true;
        while self.state != SessionState::Closed {
            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            self.fail(e);
                        }
                    }
                    None => {
                        // Every handle dropped: close politely.
                        commands_open = false;
                        if let Err(e) = self.begin_close().await {
                            self.fail(e);
                        }
                    }
                },
                event = events.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => {
                        if let Err(e) = self.handle_frame(frame).await {
                            self.fail(e);
                        }
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        self.on_link_down(reason);
                    }
                    None => {
                        self.on_link_down(None);
                    }
                },
            }
        }
        debug!("session {} dispatch loop ended", self.session_id);
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Close { replier } => {
                self.close_waiters.push(replier);
                self.begin_close().await
            }
            // Operations are only valid while established; everything
            // else fails the caller synchronously.
            command if self.state != SessionState::Established => {
                reject_command(command);
                Ok(())
            }
            Command::Call {
                procedure,
                args,
                kwargs,
                options,
                replier,
            } => {
                let request_id = self.pending.allocate(RequestKind::Call, replier);
                self.send(&Message::Call {
                    request_id,
                    options,
                    procedure,
                    args,
                    kwargs,
                })
                .await
            }
            Command::Register {
                procedure,
                options,
                handler,
                replier,
            } => {
                let request_id = self.pending.allocate(RequestKind::Register, replier);
                self.pending_registrations.insert(
                    request_id,
                    LocalRegistration {
                        procedure: procedure.clone(),
                        handler,
                    },
                );
                self.send(&Message::Register {
                    request_id,
                    options,
                    procedure,
                })
                .await
            }
            Command::Unregister {
                registration_id,
                replier,
            } => {
                if !self.registrations.contains_key(&registration_id) {
                    let _ = replier.send(Err(WampError::Application {
                        error: uri::NO_SUCH_REGISTRATION.to_string(),
                        args: List::new(),
                        kwargs: Dict::new(),
                    }));
                    return Ok(());
                }
                let request_id = self.pending.allocate(RequestKind::Unregister, replier);
                self.pending_unregistrations
                    .insert(request_id, registration_id);
                self.send(&Message::Unregister {
                    request_id,
                    registration_id,
                })
                .await
            }
            Command::Subscribe {
                topic,
                options,
                handler,
                replier,
            } => {
                let request_id = self.pending.allocate(RequestKind::Subscribe, replier);
                self.pending_subscriptions.insert(
                    request_id,
                    LocalSubscription {
                        topic: topic.clone(),
                        handler,
                    },
                );
                self.send(&Message::Subscribe {
                    request_id,
                    options,
                    topic,
                })
                .await
            }
            Command::Unsubscribe {
                subscription_id,
                replier,
            } => {
                if !self.subscriptions.contains_key(&subscription_id) {
                    let _ = replier.send(Err(WampError::Application {
                        error: uri::NO_SUCH_SUBSCRIPTION.to_string(),
                        args: List::new(),
                        kwargs: Dict::new(),
                    }));
                    return Ok(());
                }
                let request_id = self.pending.allocate(RequestKind::Unsubscribe, replier);
                self.pending_unsubscriptions
                    .insert(request_id, subscription_id);
                self.send(&Message::Unsubscribe {
                    request_id,
                    subscription_id,
                })
                .await
            }
            Command::Publish {
                topic,
                args,
                kwargs,
                mut options,
                acknowledge,
                replier,
            } => {
                let request_id = if acknowledge {
                    options.insert("acknowledge".to_string(), json!(true));
                    self.pending.allocate(RequestKind::Publish, replier)
                } else {
                    // Fire-and-forget still needs a request id on the
                    // wire, but nothing is recorded: the protocol gives
                    // the caller no way to observe delivery.
                    let id = self.pending.next_request_id();
                    let _ = replier.send(Ok(Reply::Accepted));
                    id
                };
                self.send(&Message::Publish {
                    request_id,
                    options,
                    topic,
                    args,
                    kwargs,
                })
                .await
            }
        }
    }

    /// Sends GOODBYE and leaves the established state. Pending requests
    /// drain at this transition so nothing stays silently in flight.
    async fn begin_close(&mut self) -> Result<()> {
        match self.state {
            SessionState::Established => {
                self.set_state(SessionState::Closing);
                self.pending.drain("session closing");
                self.send(&Message::goodbye(uri::CLOSE_REALM)).await
            }
            SessionState::Closing => Ok(()),
            _ => {
                self.teardown("close requested");
                Ok(())
            }
        }
    }

    async fn handle_frame(&mut self, frame: Bytes) -> Result<()> {
        let message = self.codec.decode(&frame)?;
        debug!(
            "session {} received {}",
            self.session_id,
            message.name()
        );

        if self.state == SessionState::Closing {
            return match message {
                Message::Goodbye { reason, .. } => {
                    debug!("goodbye acknowledged: {}", reason);
                    self.teardown("session closed");
                    Ok(())
                }
                // Responses racing our GOODBYE are expected; the
                // registry already drained, so just drop them.
                other => {
                    debug!("ignoring {} while closing", other.name());
                    Ok(())
                }
            };
        }

        match message {
            Message::Result {
                request_id,
                details,
                args,
                kwargs,
            } => self.pending.resolve(
                request_id,
                Reply::Result {
                    details,
                    args,
                    kwargs,
                },
            ),
            Message::Registered {
                request_id,
                registration_id,
            } => {
                let local = self.pending_registrations.remove(&request_id).ok_or_else(|| {
                    WampError::ProtocolViolation(format!(
                        "REGISTERED for unknown request id {}",
                        request_id
                    ))
                })?;
                debug!(
                    "registered {:?} as registration {}",
                    local.procedure, registration_id
                );
                self.registrations.insert(registration_id, local);
                self.pending
                    .resolve(request_id, Reply::Registered { registration_id })
            }
            Message::Unregistered { request_id } => {
                let registration_id =
                    self.pending_unregistrations.remove(&request_id).ok_or_else(|| {
                        WampError::ProtocolViolation(format!(
                            "UNREGISTERED for unknown request id {}",
                            request_id
                        ))
                    })?;
                self.registrations.remove(&registration_id);
                self.pending.resolve(request_id, Reply::Unregistered)
            }
            Message::Subscribed {
                request_id,
                subscription_id,
            } => {
                let local = self.pending_subscriptions.remove(&request_id).ok_or_else(|| {
                    WampError::ProtocolViolation(format!(
                        "SUBSCRIBED for unknown request id {}",
                        request_id
                    ))
                })?;
                debug!(
                    "subscribed to {:?} as subscription {}",
                    local.topic, subscription_id
                );
                self.subscriptions.insert(subscription_id, local);
                self.pending
                    .resolve(request_id, Reply::Subscribed { subscription_id })
            }
            Message::Unsubscribed { request_id } => {
                let subscription_id =
                    self.pending_unsubscriptions.remove(&request_id).ok_or_else(|| {
                        WampError::ProtocolViolation(format!(
                            "UNSUBSCRIBED for unknown request id {}",
                            request_id
                        ))
                    })?;
                self.subscriptions.remove(&subscription_id);
                self.pending.resolve(request_id, Reply::Unsubscribed)
            }
            Message::Published {
                request_id,
                publication_id,
            } => self
                .pending
                .resolve(request_id, Reply::Published { publication_id }),
            Message::Error {
                request_type,
                request_id,
                details: _,
                error,
                args,
                kwargs,
            } => {
                let kind = request_kind_for(request_type)?;
                // Drop any handler parked for this request.
                match kind {
                    RequestKind::Register => {
                        self.pending_registrations.remove(&request_id);
                    }
                    RequestKind::Unregister => {
                        self.pending_unregistrations.remove(&request_id);
                    }
                    RequestKind::Subscribe => {
                        self.pending_subscriptions.remove(&request_id);
                    }
                    RequestKind::Unsubscribe => {
                        self.pending_unsubscriptions.remove(&request_id);
                    }
                    RequestKind::Call | RequestKind::Publish => {}
                }
                self.pending.reject(
                    request_id,
                    kind,
                    WampError::Application {
                        error,
                        args,
                        kwargs,
                    },
                )
            }
            Message::Invocation {
                request_id,
                registration_id,
                details: _,
                args,
                kwargs,
            } => self.handle_invocation(request_id, registration_id, args, kwargs).await,
            Message::Event {
                subscription_id,
                publication_id,
                details: _,
                args,
                kwargs,
            } => {
                match self.subscriptions.get(&subscription_id) {
                    Some(subscription) => {
                        if let Err(e) = (subscription.handler)(args, kwargs) {
                            // A misbehaving local handler must not
                            // corrupt session state.
                            warn!(
                                "event handler for {:?} failed on publication {}: {}",
                                subscription.topic, publication_id, e
                            );
                        }
                    }
                    None => {
                        warn!(
                            "EVENT for unknown subscription {} (publication {})",
                            subscription_id, publication_id
                        );
                    }
                }
                Ok(())
            }
            Message::Goodbye { reason, .. } => {
                info!("router closed the session: {}", reason);
                // Best-effort acknowledgement; the link may already be
                // half down.
                let _ = self.send(&Message::goodbye(uri::GOODBYE_AND_OUT)).await;
                self.teardown("router sent GOODBYE");
                Ok(())
            }
            other => Err(WampError::ProtocolViolation(format!(
                "unexpected {} while established",
                other.name()
            ))),
        }
    }

    async fn handle_invocation(
        &mut self,
        request_id: u64,
        registration_id: u64,
        args: List,
        kwargs: Dict,
    ) -> Result<()> {
        let reply = match self.registrations.get(&registration_id) {
            Some(registration) => match (registration.handler)(args, kwargs) {
                Ok(result) => Message::Yield {
                    request_id,
                    options: Dict::new(),
                    args: result.args,
                    kwargs: result.kwargs,
                },
                Err(e) => {
                    warn!(
                        "handler for {:?} failed invocation {}: {}",
                        registration.procedure, request_id, e.error
                    );
                    Message::Error {
                        request_type: code::INVOCATION,
                        request_id,
                        details: Dict::new(),
                        error: e.error,
                        args: e.args,
                        kwargs: e.kwargs,
                    }
                }
            },
            None => {
                // The router targeted a registration we no longer hold;
                // answer with an error rather than tearing down.
                warn!(
                    "INVOCATION {} for unknown registration {}",
                    request_id, registration_id
                );
                Message::Error {
                    request_type: code::INVOCATION,
                    request_id,
                    details: Dict::new(),
                    error: uri::NO_SUCH_REGISTRATION.to_string(),
                    args: List::new(),
                    kwargs: Dict::new(),
                }
            }
        };
        self.send(&reply).await
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        debug!("session {} sending {}", self.session_id, message.name());
        send_message(&self.out, self.codec.as_ref(), message).await
    }

    fn on_link_down(&mut self, reason: Option<String>) {
        let reason = reason.unwrap_or_else(|| "link down".to_string());
        if self.state == SessionState::Closing {
            // Closing anyway; losing the link completes the close.
            debug!("link lost while closing: {}", reason);
        } else {
            warn!("session {} lost its transport: {}", self.session_id, reason);
        }
        self.teardown(&reason);
    }

    fn fail(&mut self, e: WampError) {
        error!("session {} fatal: {}", self.session_id, e);
        self.teardown(&e.to_string());
    }

    /// Terminal transition. Drains the correlation registry, discards
    /// registrations and subscriptions, and wakes close waiters.
    fn teardown(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        self.set_state(SessionState::Closed);
        self.pending.drain(reason);
        self.pending_registrations.clear();
        self.pending_unregistrations.clear();
        self.pending_subscriptions.clear();
        self.pending_unsubscriptions.clear();
        self.registrations.clear();
        self.subscriptions.clear();
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        info!("session {} closed: {}", self.session_id, reason);
    }
}

fn reject_command(command: Command) {
    match command {
        Command::Call { replier, .. }
        | Command::Register { replier, .. }
        | Command::Unregister { replier, .. }
        | Command::Subscribe { replier, .. }
        | Command::Unsubscribe { replier, .. }
        | Command::Publish { replier, .. } => {
            let _ = replier.send(Err(WampError::SessionClosed));
        }
        Command::Close { replier } => {
            let _ = replier.send(Ok(()));
        }
    }
}

fn request_kind_for(request_type: u64) -> Result<RequestKind> {
    Ok(match request_type {
        code::CALL => RequestKind::Call,
        code::REGISTER => RequestKind::Register,
        code::UNREGISTER => RequestKind::Unregister,
        code::SUBSCRIBE => RequestKind::Subscribe,
        code::UNSUBSCRIBE => RequestKind::Unsubscribe,
        code::PUBLISH => RequestKind::Publish,
        other => {
            return Err(WampError::ProtocolViolation(format!(
                "ERROR for unexpected request type {}",
                other
            )))
        }
    })
}
