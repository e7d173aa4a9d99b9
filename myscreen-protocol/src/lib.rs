use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_derive::{Deserialize, Serialize};

/// The failure reason strings the daemon puts on the wire. Clients
/// print them verbatim, so they are part of the protocol contract.
pub mod reasons {
    pub const ID_TAKEN: &str = "id is already taken";
    pub const NO_SUCH_SESSION: &str = "such a session does not exist";
    pub const ALREADY_ATTACHED: &str = "there's another client attached to this session";
    pub const NOT_IMPLEMENTED: &str = "not implemented";
}

/// Command tags a message with the operation it belongs to.
///
/// On the wire a command is a bare integer code, so the enum
/// round-trips through u8 rather than serializing by variant name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(into = "u8", try_from = "u8")]
pub enum Command {
    New = 0,
    List = 1,
    Attach = 2,
    Detach = 3,
    Kill = 4,
    Data = 5,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = anyhow::Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Command::New),
            1 => Ok(Command::List),
            2 => Ok(Command::Attach),
            3 => Ok(Command::Detach),
            4 => Ok(Command::Kill),
            5 => Ok(Command::Data),
            _ => Err(anyhow!("unknown command code: {}", code)),
        }
    }
}

/// Status indicates whether a message reports success or failure.
///
/// On a client->daemon `Data` message the status doubles as the
/// end-of-input marker: `Failure` means the client's stdin has hit EOF.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(into = "bool", from = "bool")]
pub enum Status {
    Failure,
    Success,
}

impl From<Status> for bool {
    fn from(s: Status) -> bool {
        matches!(s, Status::Success)
    }
}

impl From<bool> for Status {
    fn from(b: bool) -> Status {
        if b {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Data is the keyed payload carried by every message. All fields are
/// optional on the wire; which ones are meaningful depends on the
/// command (see [`Request`] for the validated view).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Data {
    /// A session identifier (NEW, ATTACH and KILL requests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The identifiers of all live sessions (LIST replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<String>>,
    /// A human readable failure explanation (failure replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The absolute byte offset of the first byte in `data`
    /// (daemon->client DATA messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_pos: Option<u64>,
    /// Base64 encoded payload bytes (DATA messages in both directions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A single protocol message. The wire form is the JSON encoding of
/// this struct prefixed with a 4 byte little endian unsigned length.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    pub command: Command,
    #[serde(default)]
    pub data: Data,
    pub status: Status,
}

impl Message {
    /// An empty-payload success message, used both for bare requests
    /// (LIST, DETACH) and for bare confirmations.
    pub fn success(command: Command) -> Message {
        Message { command, data: Data::default(), status: Status::Success }
    }

    /// A request that names a session.
    pub fn with_id<S: Into<String>>(command: Command, id: S) -> Message {
        Message {
            command,
            data: Data { id: Some(id.into()), ..Data::default() },
            status: Status::Success,
        }
    }

    /// A failure reply carrying an explanation for the client to print.
    pub fn failure<S: Into<String>>(command: Command, reason: S) -> Message {
        Message {
            command,
            data: Data { reason: Some(reason.into()), ..Data::default() },
            status: Status::Failure,
        }
    }

    /// A LIST reply enumerating the live session ids.
    pub fn list_reply(sessions: Vec<String>) -> Message {
        Message {
            command: Command::List,
            data: Data { sessions: Some(sessions), ..Data::default() },
            status: Status::Success,
        }
    }

    /// A daemon->client DATA message carrying a snapshot of the
    /// session's rolling output buffer.
    pub fn output_chunk(start_pos: u64, bytes: &[u8]) -> Message {
        Message {
            command: Command::Data,
            data: Data {
                start_pos: Some(start_pos),
                data: Some(BASE64.encode(bytes)),
                ..Data::default()
            },
            status: Status::Success,
        }
    }

    /// A client->daemon DATA message carrying shell input. `eof` flags
    /// that the client's stdin is exhausted; by convention the final
    /// chunk travels with an empty payload.
    pub fn input_chunk(bytes: &[u8], eof: bool) -> Message {
        Message {
            command: Command::Data,
            data: Data { data: Some(BASE64.encode(bytes)), ..Data::default() },
            status: (!eof).into(),
        }
    }

    /// The failure reason, for printing. Failure replies always carry
    /// one, but a peer speaking a newer dialect might not.
    pub fn reason(&self) -> &str {
        self.data.reason.as_deref().unwrap_or("unknown reason")
    }

    /// The session list of a LIST reply.
    pub fn sessions(&self) -> anyhow::Result<&[String]> {
        self.data
            .sessions
            .as_deref()
            .ok_or_else(|| anyhow!("LIST reply is missing the sessions field"))
    }

    /// Unpack a daemon->client DATA message into its absolute start
    /// offset and decoded payload bytes.
    pub fn output_payload(&self) -> anyhow::Result<(u64, Vec<u8>)> {
        let start_pos =
            self.data.start_pos.ok_or_else(|| anyhow!("DATA message is missing start_pos"))?;
        let raw = self.data.data.as_deref().ok_or_else(|| anyhow!("DATA message has no payload"))?;
        let bytes = BASE64.decode(raw).context("decoding DATA payload")?;
        Ok((start_pos, bytes))
    }
}

/// The validated, typed view of an inbound message. Wire messages are
/// dynamic maps for compatibility; the daemon converts them to this
/// enum on receipt so that every field is checked exactly once.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    New { id: Option<String> },
    List,
    Attach { id: String },
    Detach,
    Kill { id: String },
    Data { bytes: Vec<u8>, eof: bool },
}

impl TryFrom<Message> for Request {
    type Error = anyhow::Error;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        match msg.command {
            Command::New => Ok(Request::New { id: msg.data.id }),
            Command::List => Ok(Request::List),
            Command::Attach => {
                let id = msg.data.id.ok_or_else(|| anyhow!("ATTACH message has no id field"))?;
                Ok(Request::Attach { id })
            }
            Command::Detach => Ok(Request::Detach),
            Command::Kill => {
                let id = msg.data.id.ok_or_else(|| anyhow!("KILL message has no id field"))?;
                Ok(Request::Kill { id })
            }
            Command::Data => {
                let raw =
                    msg.data.data.ok_or_else(|| anyhow!("DATA message has no data field"))?;
                let bytes = BASE64.decode(raw).context("decoding DATA payload")?;
                Ok(Request::Data { bytes, eof: msg.status == Status::Failure })
            }
        }
    }
}
