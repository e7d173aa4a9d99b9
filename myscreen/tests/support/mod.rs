// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::{path::PathBuf, thread, time};

use anyhow::anyhow;

pub mod attach;
pub mod daemon;

/// The compiled client binary under test.
pub fn myscreen_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_myscreen"))
}

/// The compiled daemon binary under test.
pub fn myscreend_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_myscreend"))
}

pub fn dump_err<F>(f: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let result = f();
    if let Err(err) = &result {
        eprintln!("TEST FAILED: {:?}", err);
    }
    result
}

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
