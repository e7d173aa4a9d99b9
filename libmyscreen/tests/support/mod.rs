// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::{thread, time};

use anyhow::{anyhow, ensure, Context};
use libmyscreen::protocol::Client;
use myscreen_protocol::Command;

pub mod daemon;

pub fn wait_until<P>(mut pred: P) -> anyhow::Result<()>
where
    P: FnMut() -> anyhow::Result<bool>,
{
    let mut sleep_dur = time::Duration::from_millis(5);
    for _ in 0..12 {
        if pred()? {
            return Ok(());
        } else {
            thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }
    }

    Err(anyhow!("pred never became true"))
}

/// Consume DATA messages until a buffer snapshot contains `needle`,
/// returning that snapshot. The enclosing test's timeout bounds the
/// wait if the bytes never show up.
pub fn read_output_until(client: &mut Client, needle: &[u8]) -> anyhow::Result<Vec<u8>> {
    loop {
        let msg = client.recv().context("reading DATA message")?;
        ensure!(msg.command == Command::Data, "expected DATA, got {:?}", msg.command);
        let (_, bytes) = msg.output_payload()?;
        if bytes.windows(needle.len()).any(|w| w == needle) {
            return Ok(bytes);
        }
    }
}
