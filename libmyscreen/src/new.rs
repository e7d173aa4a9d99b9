use myscreen_protocol::{Command, Message};

use crate::attach;

pub fn run(id: Option<String>, port: u16) -> anyhow::Result<()> {
    let request = match id {
        Some(id) => Message::with_id(Command::New, id),
        None => Message::success(Command::New),
    };
    attach::request_and_stream(request, port)
}
