use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use anyhow::{anyhow, Context};
use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use myscreen_protocol::Message;

use crate::consts;

/// The centralized encoding function that should be used for all
/// protocol serialization. Frames are the JSON form of the message
/// prefixed with a 4 byte unsigned little endian length.
pub fn send_message<W>(w: &mut W, msg: &Message) -> anyhow::Result<()>
where
    W: Write,
{
    let buf = serde_json::to_vec(msg).context("formatting message")?;
    if buf.len() > consts::MAX_FRAME_BYTES as usize {
        return Err(anyhow!(
            "frame of {} bytes exceeds size limit of {} bytes",
            buf.len(),
            consts::MAX_FRAME_BYTES
        ));
    }
    w.write_u32::<LittleEndian>(buf.len() as u32).context("writing length prefix")?;
    w.write_all(&buf).context("writing message body")?;
    w.flush().context("flushing message")?;
    Ok(())
}

/// The centralized decoding function that should be used for all
/// protocol deserialization. Reads exactly one frame; a short read,
/// an oversized length or a malformed body all surface as errors
/// that should tear down the connection.
pub fn recv_message<R>(r: &mut R) -> anyhow::Result<Message>
where
    R: Read,
{
    let len = r.read_u32::<LittleEndian>().context("reading length prefix")?;
    if len > consts::MAX_FRAME_BYTES {
        return Err(anyhow!(
            "frame of {} bytes exceeds size limit of {} bytes",
            len,
            consts::MAX_FRAME_BYTES
        ));
    }
    let mut buf: Vec<u8> = vec![0; len as usize];
    r.read_exact(&mut buf).context("reading message body")?;
    serde_json::from_slice(&buf).context("parsing message")
}

/// A client connection to the daemon.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub fn connect(port: u16) -> anyhow::Result<Client> {
        let stream = match TcpStream::connect(("127.0.0.1", port)) {
            Ok(s) => s,
            Err(err) => {
                if err.kind() == io::ErrorKind::ConnectionRefused {
                    eprintln!("could not connect to daemon");
                }
                return Err(anyhow::Error::new(err).context("connecting to daemon"));
            }
        };
        Ok(Client { stream })
    }

    pub fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        send_message(&mut self.stream, msg)
    }

    pub fn recv(&mut self) -> anyhow::Result<Message> {
        recv_message(&mut self.stream)
    }

    /// Send a single request and wait for the matching reply.
    pub fn round_trip(&mut self, msg: &Message) -> anyhow::Result<Message> {
        self.send(msg).context("sending request")?;
        self.recv().context("reading reply")
    }

    /// Surrender the underlying stream, for callers that need to split
    /// it between reader and writer threads.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}
