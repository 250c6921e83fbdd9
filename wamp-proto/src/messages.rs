use crate::{ProtocolError, Result};
use serde_json::{json, Value};

/// Positional arguments of an application payload.
pub type List = Vec<Value>;
/// Keyword arguments / options / details of an application payload.
pub type Dict = serde_json::Map<String, Value>;

/// WAMP message type codes (client-relevant subset).
pub mod code {
    pub const HELLO: u64 = 1;
    pub const WELCOME: u64 = 2;
    pub const ABORT: u64 = 3;
    pub const CHALLENGE: u64 = 4;
    pub const AUTHENTICATE: u64 = 5;
    pub const GOODBYE: u64 = 6;
    pub const ERROR: u64 = 8;
    pub const PUBLISH: u64 = 16;
    pub const PUBLISHED: u64 = 17;
    pub const SUBSCRIBE: u64 = 32;
    pub const SUBSCRIBED: u64 = 33;
    pub const UNSUBSCRIBE: u64 = 34;
    pub const UNSUBSCRIBED: u64 = 35;
    pub const EVENT: u64 = 36;
    pub const CALL: u64 = 48;
    pub const RESULT: u64 = 50;
    pub const REGISTER: u64 = 64;
    pub const REGISTERED: u64 = 65;
    pub const UNREGISTER: u64 = 66;
    pub const UNREGISTERED: u64 = 67;
    pub const INVOCATION: u64 = 68;
    pub const YIELD: u64 = 70;
}

/// A WAMP protocol message. On the wire every message is a JSON-style
/// array `[code, field...]`; the enum carries exactly the fields the
/// protocol defines for each type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session_id: u64,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Challenge {
        auth_method: String,
        extra: Dict,
    },
    Authenticate {
        signature: String,
        extra: Dict,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Error {
        request_type: u64,
        request_id: u64,
        details: Dict,
        error: String,
        args: List,
        kwargs: Dict,
    },
    Publish {
        request_id: u64,
        options: Dict,
        topic: String,
        args: List,
        kwargs: Dict,
    },
    Published {
        request_id: u64,
        publication_id: u64,
    },
    Subscribe {
        request_id: u64,
        options: Dict,
        topic: String,
    },
    Subscribed {
        request_id: u64,
        subscription_id: u64,
    },
    Unsubscribe {
        request_id: u64,
        subscription_id: u64,
    },
    Unsubscribed {
        request_id: u64,
    },
    Event {
        subscription_id: u64,
        publication_id: u64,
        details: Dict,
        args: List,
        kwargs: Dict,
    },
    Call {
        request_id: u64,
        options: Dict,
        procedure: String,
        args: List,
        kwargs: Dict,
    },
    Result {
        request_id: u64,
        details: Dict,
        args: List,
        kwargs: Dict,
    },
    Register {
        request_id: u64,
        options: Dict,
        procedure: String,
    },
    Registered {
        request_id: u64,
        registration_id: u64,
    },
    Unregister {
        request_id: u64,
        registration_id: u64,
    },
    Unregistered {
        request_id: u64,
    },
    Invocation {
        request_id: u64,
        registration_id: u64,
        details: Dict,
        args: List,
        kwargs: Dict,
    },
    Yield {
        request_id: u64,
        options: Dict,
        args: List,
        kwargs: Dict,
    },
}

impl Message {
    pub fn code(&self) -> u64 {
        match self {
            Message::Hello { .. } => code::HELLO,
            Message::Welcome { .. } => code::WELCOME,
            Message::Abort { .. } => code::ABORT,
            Message::Challenge { .. } => code::CHALLENGE,
            Message::Authenticate { .. } => code::AUTHENTICATE,
            Message::Goodbye { .. } => code::GOODBYE,
            Message::Error { .. } => code::ERROR,
            Message::Publish { .. } => code::PUBLISH,
            Message::Published { .. } => code::PUBLISHED,
            Message::Subscribe { .. } => code::SUBSCRIBE,
            Message::Subscribed { .. } => code::SUBSCRIBED,
            Message::Unsubscribe { .. } => code::UNSUBSCRIBE,
            Message::Unsubscribed { .. } => code::UNSUBSCRIBED,
            Message::Event { .. } => code::EVENT,
            Message::Call { .. } => code::CALL,
            Message::Result { .. } => code::RESULT,
            Message::Register { .. } => code::REGISTER,
            Message::Registered { .. } => code::REGISTERED,
            Message::Unregister { .. } => code::UNREGISTER,
            Message::Unregistered { .. } => code::UNREGISTERED,
            Message::Invocation { .. } => code::INVOCATION,
            Message::Yield { .. } => code::YIELD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "HELLO",
            Message::Welcome { .. } => "WELCOME",
            Message::Abort { .. } => "ABORT",
            Message::Challenge { .. } => "CHALLENGE",
            Message::Authenticate { .. } => "AUTHENTICATE",
            Message::Goodbye { .. } => "GOODBYE",
            Message::Error { .. } => "ERROR",
            Message::Publish { .. } => "PUBLISH",
            Message::Published { .. } => "PUBLISHED",
            Message::Subscribe { .. } => "SUBSCRIBE",
            Message::Subscribed { .. } => "SUBSCRIBED",
            Message::Unsubscribe { .. } => "UNSUBSCRIBE",
            Message::Unsubscribed { .. } => "UNSUBSCRIBED",
            Message::Event { .. } => "EVENT",
            Message::Call { .. } => "CALL",
            Message::Result { .. } => "RESULT",
            Message::Register { .. } => "REGISTER",
            Message::Registered { .. } => "REGISTERED",
            Message::Unregister { .. } => "UNREGISTER",
            Message::Unregistered { .. } => "UNREGISTERED",
            Message::Invocation { .. } => "INVOCATION",
            Message::Yield { .. } => "YIELD",
        }
    }

    /// HELLO announcing the standard client roles.
    pub fn hello(realm: impl Into<String>) -> Self {
        let mut details = Dict::new();
        details.insert("roles".to_string(), client_roles());
        Message::Hello {
            realm: realm.into(),
            details,
        }
    }

    pub fn goodbye(reason: impl Into<String>) -> Self {
        Message::Goodbye {
            details: Dict::new(),
            reason: reason.into(),
        }
    }

    /// Converts to the protocol's array representation.
    pub fn to_wire(&self) -> Vec<Value> {
        let mut arr = vec![json!(self.code())];
        match self {
            Message::Hello { realm, details } => {
                arr.push(json!(realm));
                arr.push(Value::Object(details.clone()));
            }
            Message::Welcome {
                session_id,
                details,
            } => {
                arr.push(json!(session_id));
                arr.push(Value::Object(details.clone()));
            }
            Message::Abort { details, reason } => {
                arr.push(Value::Object(details.clone()));
                arr.push(json!(reason));
            }
            Message::Challenge { auth_method, extra } => {
                arr.push(json!(auth_method));
                arr.push(Value::Object(extra.clone()));
            }
            Message::Authenticate { signature, extra } => {
                arr.push(json!(signature));
                arr.push(Value::Object(extra.clone()));
            }
            Message::Goodbye { details, reason } => {
                arr.push(Value::Object(details.clone()));
                arr.push(json!(reason));
            }
            Message::Error {
                request_type,
                request_id,
                details,
                error,
                args,
                kwargs,
            } => {
                arr.push(json!(request_type));
                arr.push(json!(request_id));
                arr.push(Value::Object(details.clone()));
                arr.push(json!(error));
                push_payload(&mut arr, args, kwargs);
            }
            Message::Publish {
                request_id,
                options,
                topic,
                args,
                kwargs,
            } => {
                arr.push(json!(request_id));
                arr.push(Value::Object(options.clone()));
                arr.push(json!(topic));
                push_payload(&mut arr, args, kwargs);
            }
            Message::Published {
                request_id,
                publication_id,
            } => {
                arr.push(json!(request_id));
                arr.push(json!(publication_id));
            }
            Message::Subscribe {
                request_id,
                options,
                topic,
            } => {
                arr.push(json!(request_id));
                arr.push(Value::Object(options.clone()));
                arr.push(json!(topic));
            }
            Message::Subscribed {
                request_id,
                subscription_id,
            } => {
                arr.push(json!(request_id));
                arr.push(json!(subscription_id));
            }
            Message::Unsubscribe {
                request_id,
                subscription_id,
            } => {
                arr.push(json!(request_id));
                arr.push(json!(subscription_id));
            }
            Message::Unsubscribed { request_id } => {
                arr.push(json!(request_id));
            }
            Message::Event {
                subscription_id,
                publication_id,
                details,
                args,
                kwargs,
            } => {
                arr.push(json!(subscription_id));
                arr.push(json!(publication_id));
                arr.push(Value::Object(details.clone()));
                push_payload(&mut arr, args, kwargs);
            }
            Message::Call {
                request_id,
                options,
                procedure,
                args,
                kwargs,
            } => {
                arr.push(json!(request_id));
                arr.push(Value::Object(options.clone()));
                arr.push(json!(procedure));
                push_payload(&mut arr, args, kwargs);
            }
            Message::Result {
                request_id,
                details,
                args,
                kwargs,
            } => {
                arr.push(json!(request_id));
                arr.push(Value::Object(details.clone()));
                push_payload(&mut arr, args, kwargs);
            }
            Message::Register {
                request_id,
                options,
                procedure,
            } => {
                arr.push(json!(request_id));
                arr.push(Value::Object(options.clone()));
                arr.push(json!(procedure));
            }
            Message::Registered {
                request_id,
                registration_id,
            } => {
                arr.push(json!(request_id));
                arr.push(json!(registration_id));
            }
            Message::Unregister {
                request_id,
                registration_id,
            } => {
                arr.push(json!(request_id));
                arr.push(json!(registration_id));
            }
            Message::Unregistered { request_id } => {
                arr.push(json!(request_id));
            }
            Message::Invocation {
                request_id,
                registration_id,
                details,
                args,
                kwargs,
            } => {
                arr.push(json!(request_id));
                arr.push(json!(registration_id));
                arr.push(Value::Object(details.clone()));
                push_payload(&mut arr, args, kwargs);
            }
            Message::Yield {
                request_id,
                options,
                args,
                kwargs,
            } => {
                arr.push(json!(request_id));
                arr.push(Value::Object(options.clone()));
                push_payload(&mut arr, args, kwargs);
            }
        }
        arr
    }

    /// Parses the protocol's array representation. Fails on unknown
    /// message codes and structurally malformed arrays.
    pub fn from_wire(raw: Vec<Value>) -> Result<Message> {
        let mut fields = raw.into_iter();
        let code = match fields.next() {
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| ProtocolError::Malformed {
                kind: "message",
                detail: "non-integer message code".to_string(),
            })?,
            other => {
                return Err(ProtocolError::Malformed {
                    kind: "message",
                    detail: format!("expected numeric message code, got {:?}", other),
                })
            }
        };

        let mut fields = Fields::new(kind_name(code)?, fields);

        let message = match code {
            code::HELLO => Message::Hello {
                realm: fields.string("realm")?,
                details: fields.dict("details")?,
            },
            code::WELCOME => Message::Welcome {
                session_id: fields.id("session_id")?,
                details: fields.dict("details")?,
            },
            code::ABORT => Message::Abort {
                details: fields.dict("details")?,
                reason: fields.string("reason")?,
            },
            code::CHALLENGE => Message::Challenge {
                auth_method: fields.string("auth_method")?,
                extra: fields.dict("extra")?,
            },
            code::AUTHENTICATE => Message::Authenticate {
                signature: fields.string("signature")?,
                extra: fields.dict("extra")?,
            },
            code::GOODBYE => Message::Goodbye {
                details: fields.dict("details")?,
                reason: fields.string("reason")?,
            },
            code::ERROR => Message::Error {
                request_type: fields.id("request_type")?,
                request_id: fields.id("request_id")?,
                details: fields.dict("details")?,
                error: fields.string("error")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            code::PUBLISH => Message::Publish {
                request_id: fields.id("request_id")?,
                options: fields.dict("options")?,
                topic: fields.string("topic")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            code::PUBLISHED => Message::Published {
                request_id: fields.id("request_id")?,
                publication_id: fields.id("publication_id")?,
            },
            code::SUBSCRIBE => Message::Subscribe {
                request_id: fields.id("request_id")?,
                options: fields.dict("options")?,
                topic: fields.string("topic")?,
            },
            code::SUBSCRIBED => Message::Subscribed {
                request_id: fields.id("request_id")?,
                subscription_id: fields.id("subscription_id")?,
            },
            code::UNSUBSCRIBE => Message::Unsubscribe {
                request_id: fields.id("request_id")?,
                subscription_id: fields.id("subscription_id")?,
            },
            code::UNSUBSCRIBED => Message::Unsubscribed {
                request_id: fields.id("request_id")?,
            },
            code::EVENT => Message::Event {
                subscription_id: fields.id("subscription_id")?,
                publication_id: fields.id("publication_id")?,
                details: fields.dict("details")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            code::CALL => Message::Call {
                request_id: fields.id("request_id")?,
                options: fields.dict("options")?,
                procedure: fields.string("procedure")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            code::RESULT => Message::Result {
                request_id: fields.id("request_id")?,
                details: fields.dict("details")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            code::REGISTER => Message::Register {
                request_id: fields.id("request_id")?,
                options: fields.dict("options")?,
                procedure: fields.string("procedure")?,
            },
            code::REGISTERED => Message::Registered {
                request_id: fields.id("request_id")?,
                registration_id: fields.id("registration_id")?,
            },
            code::UNREGISTER => Message::Unregister {
                request_id: fields.id("request_id")?,
                registration_id: fields.id("registration_id")?,
            },
            code::UNREGISTERED => Message::Unregistered {
                request_id: fields.id("request_id")?,
            },
            code::INVOCATION => Message::Invocation {
                request_id: fields.id("request_id")?,
                registration_id: fields.id("registration_id")?,
                details: fields.dict("details")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            code::YIELD => Message::Yield {
                request_id: fields.id("request_id")?,
                options: fields.dict("options")?,
                args: fields.trailing_list()?,
                kwargs: fields.trailing_dict()?,
            },
            other => return Err(ProtocolError::UnknownMessageCode(other)),
        };

        Ok(message)
    }
}

/// The protocol omits trailing empty payload fields: kwargs is dropped
/// when empty, and args is dropped too when both are empty.
fn push_payload(arr: &mut Vec<Value>, args: &List, kwargs: &Dict) {
    if kwargs.is_empty() {
        if !args.is_empty() {
            arr.push(Value::Array(args.clone()));
        }
    } else {
        arr.push(Value::Array(args.clone()));
        arr.push(Value::Object(kwargs.clone()));
    }
}

/// The roles a client session announces in HELLO.
pub fn client_roles() -> Value {
    json!({
        "caller": { "features": {} },
        "callee": { "features": {} },
        "publisher": { "features": {} },
        "subscriber": { "features": {} },
    })
}

fn kind_name(code: u64) -> Result<&'static str> {
    Ok(match code {
        code::HELLO => "HELLO",
        code::WELCOME => "WELCOME",
        code::ABORT => "ABORT",
        code::CHALLENGE => "CHALLENGE",
        code::AUTHENTICATE => "AUTHENTICATE",
        code::GOODBYE => "GOODBYE",
        code::ERROR => "ERROR",
        code::PUBLISH => "PUBLISH",
        code::PUBLISHED => "PUBLISHED",
        code::SUBSCRIBE => "SUBSCRIBE",
        code::SUBSCRIBED => "SUBSCRIBED",
        code::UNSUBSCRIBE => "UNSUBSCRIBE",
        code::UNSUBSCRIBED => "UNSUBSCRIBED",
        code::EVENT => "EVENT",
        code::CALL => "CALL",
        code::RESULT => "RESULT",
        code::REGISTER => "REGISTER",
        code::REGISTERED => "REGISTERED",
        code::UNREGISTER => "UNREGISTER",
        code::UNREGISTERED => "UNREGISTERED",
        code::INVOCATION => "INVOCATION",
        code::YIELD => "YIELD",
        other => return Err(ProtocolError::UnknownMessageCode(other)),
    })
}

/// Field-by-field reader over a decoded message array.
struct Fields {
    kind: &'static str,
    iter: std::vec::IntoIter<Value>,
}

impl Fields {
    fn new(kind: &'static str, iter: std::vec::IntoIter<Value>) -> Self {
        Self { kind, iter }
    }

    fn malformed(&self, detail: String) -> ProtocolError {
        ProtocolError::Malformed {
            kind: self.kind,
            detail,
        }
    }

    fn next(&mut self, name: &str) -> Result<Value> {
        self.iter
            .next()
            .ok_or_else(|| self.malformed(format!("missing field: {}", name)))
    }

    fn id(&mut self, name: &str) -> Result<u64> {
        match self.next(name)? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| self.malformed(format!("field {} is not an id", name))),
            other => Err(self.malformed(format!("field {} expected integer, got {}", name, other))),
        }
    }

    fn string(&mut self, name: &str) -> Result<String> {
        match self.next(name)? {
            Value::String(s) => Ok(s),
            other => Err(self.malformed(format!("field {} expected string, got {}", name, other))),
        }
    }

    fn dict(&mut self, name: &str) -> Result<Dict> {
        match self.next(name)? {
            Value::Object(map) => Ok(map),
            other => Err(self.malformed(format!("field {} expected object, got {}", name, other))),
        }
    }

    /// Optional trailing args list; absent means empty.
    fn trailing_list(&mut self) -> Result<List> {
        match self.iter.next() {
            None => Ok(List::new()),
            Some(Value::Array(list)) => Ok(list),
            Some(other) => Err(self.malformed(format!("args expected list, got {}", other))),
        }
    }

    /// Optional trailing kwargs dict; absent means empty.
    fn trailing_dict(&mut self) -> Result<Dict> {
        match self.iter.next() {
            None => Ok(Dict::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(self.malformed(format!("kwargs expected object, got {}", other))),
        }
    }
}
