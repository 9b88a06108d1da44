//! The remote control protocol: a tiny JSON-line-framed TCP request/response
//! exchange used to kill a running task (or the whole worker process) from
//! another host without going through the database.
//!
//! Wire format: one JSON object per line on the request side (`{"cmd":...,
//! "args":[...],"kwargs":{...}}`), a single JSON object with no trailing
//! newline on the response side (`{"msg":...,"err":bool}`), followed by the
//! server half-closing its write side.

pub mod client;
pub mod server;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request sent over the wire. `cmd` names the operation; `args`/`kwargs`
/// carry its parameters, mirroring the source's loose `(*args, **kwargs)`
/// dispatch rather than a fixed per-command struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: HashMap<String, Value>,
}

impl Request {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            kwargs: HashMap::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// A response received over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub msg: String,
    pub err: bool,
}

impl Response {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            err: false,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            err: true,
        }
    }
}
