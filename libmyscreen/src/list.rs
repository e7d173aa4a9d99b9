use anyhow::Context;
use myscreen_protocol::{Command, Message};

use crate::protocol;

pub fn run(port: u16) -> anyhow::Result<()> {
    let mut client = protocol::Client::connect(port)?;
    let reply =
        client.round_trip(&Message::success(Command::List)).context("listing sessions")?;
    let sessions = reply.sessions()?;

    println!("{} sessions:", sessions.len());
    for id in sessions {
        println!("{}", id);
    }

    Ok(())
}
