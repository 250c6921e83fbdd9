use crate::correlation::Reply;
use crate::error::{Result, WampError};
use crate::session::{Command, InvocationError, InvocationResult, Session};
use std::sync::Arc;
use std::time::Duration;
use wamp_proto::{Dict, List};

/// Options for a single `call`.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caller-side deadline. On elapse the call resolves with
    /// [`WampError::Timeout`] and a late RESULT/ERROR is discarded.
    pub timeout: Option<Duration>,
    /// Pass-through options dict sent in the CALL message.
    pub extra: Dict,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub extra: Dict,
}

/// Outcome of a successful remote procedure call.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub details: Dict,
    pub args: List,
    pub kwargs: Dict,
}

/// A procedure this session registered with the router.
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: u64,
    pub procedure: String,
}

impl Session {
    /// Calls a remote procedure and suspends until its RESULT or ERROR
    /// arrives. Concurrent calls are independent; each resolves with
    /// the response matching its own request id.
    pub async fn call(
        &self,
        procedure: impl Into<String>,
        args: List,
        kwargs: Dict,
        options: CallOptions,
    ) -> Result<CallResult> {
        let procedure = procedure.into();
        let request = self.request(|replier| Command::Call {
            procedure,
            args,
            kwargs,
            options: options.extra,
            replier,
        });

        let reply = match options.timeout {
            Some(deadline) => tokio::time::timeout(deadline, request)
                .await
                .map_err(|_| WampError::Timeout)??,
            None => request.await?,
        };

        match reply {
            Reply::Result {
                details,
                args,
                kwargs,
            } => Ok(CallResult {
                details,
                args,
                kwargs,
            }),
            other => Err(WampError::ProtocolViolation(format!(
                "mismatched reply for call: {:?}",
                other
            ))),
        }
    }

    /// Registers a procedure for remote callers. The handler runs in
    /// the session's dispatch loop for each INVOCATION; its result is
    /// sent back as YIELD, its error as a WAMP ERROR.
    pub async fn register<F>(
        &self,
        procedure: impl Into<String>,
        handler: F,
        options: RegisterOptions,
    ) -> Result<Registration>
    where
        F: Fn(List, Dict) -> std::result::Result<InvocationResult, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        let procedure = procedure.into();
        let reply = self
            .request(|replier| Command::Register {
                procedure: procedure.clone(),
                options: options.extra,
                handler: Arc::new(handler),
                replier,
            })
            .await?;

        match reply {
            Reply::Registered { registration_id } => Ok(Registration {
                id: registration_id,
                procedure,
            }),
            other => Err(WampError::ProtocolViolation(format!(
                "mismatched reply for register: {:?}",
                other
            ))),
        }
    }

    /// Removes a registration. After the router confirms, further
    /// INVOCATIONs for it are answered with an error, not dispatched.
    pub async fn unregister(&self, registration: &Registration) -> Result<()> {
        let reply = self
            .request(|replier| Command::Unregister {
                registration_id: registration.id,
                replier,
            })
            .await?;

        match reply {
            Reply::Unregistered => Ok(()),
            other => Err(WampError::ProtocolViolation(format!(
                "mismatched reply for unregister: {:?}",
                other
            ))),
        }
    }
}
