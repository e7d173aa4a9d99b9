use anyhow::Context;
use myscreen_protocol::{Command, Message, Status};

use crate::protocol;

pub fn run(id: String, port: u16) -> anyhow::Result<()> {
    let mut client = protocol::Client::connect(port)?;
    let reply =
        client.round_trip(&Message::with_id(Command::Kill, id)).context("killing session")?;

    match reply.status {
        Status::Success => println!("OK!"),
        Status::Failure => println!("Failed to kill the session: {}", reply.reason()),
    }

    Ok(())
}
