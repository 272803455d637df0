//! Length-prefixed bincode framing over TCP, for the `cluster` deployment mode.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::thread;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A framed, bincode-encoded connection to one peer node.
///
/// Frames are a `u32` big-endian length prefix followed by that many bytes of bincode payload,
/// one envelope per frame.
pub struct NetworkConnection<T> {
    writer: Mutex<BufWriter<TcpStream>>,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Send + 'static> NetworkConnection<T> {
    /// Wraps an already-connected stream for sending.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let writer = BufWriter::new(stream);
        Ok(NetworkConnection { writer: Mutex::new(writer), _marker: PhantomData })
    }

    /// Serializes and writes one frame, flushing immediately.
    ///
    /// The lock is held for the duration of the write so that frames from concurrent callers
    /// never interleave on the wire.
    pub fn send(&self, value: &T) -> io::Result<()> {
        let bytes = bincode::serialize(value).map_err(to_io_error)?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?;
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&bytes)?;
        writer.flush()
    }

    /// Spawns a background thread decoding frames from `stream` and forwarding each value to
    /// `sink`, until the peer closes the connection or a frame fails to decode.
    pub fn spawn_reader(stream: TcpStream, sink: Sender<T>) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name("sc-network-reader".to_string()).spawn(move || {
            let mut reader = BufReader::new(stream);
            loop {
                let mut len_bytes = [0u8; 4];
                if reader.read_exact(&mut len_bytes).is_err() {
                    break;
                }
                let len = u32::from_be_bytes(len_bytes) as usize;
                let mut buf = vec![0u8; len];
                if reader.read_exact(&mut buf).is_err() {
                    break;
                }
                match bincode::deserialize::<T>(&buf) {
                    Ok(value) if sink.send(value).is_ok() => {}
                    _ => break,
                }
            }
        })
    }
}

fn to_io_error(err: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Accepts exactly `expected_peers` inbound connections on `listener`, in arbitrary order.
///
/// Used by node 0 of a `cluster` deployment to gather handshakes from every other node.
pub fn accept_peers(listener: &TcpListener, expected_peers: usize) -> io::Result<Vec<TcpStream>> {
    let mut peers = Vec::with_capacity(expected_peers);
    for _ in 0..expected_peers {
        let (stream, _addr) = listener.accept()?;
        peers.push(stream);
    }
    Ok(peers)
}

/// Connects to `addresses` in order, retrying each a few times to absorb the other nodes'
/// listener-startup lag.
pub fn connect_peers(addresses: &[String]) -> io::Result<Vec<TcpStream>> {
    let mut peers = Vec::with_capacity(addresses.len());
    for address in addresses {
        peers.push(connect_with_retry(address)?);
    }
    Ok(peers)
}

fn connect_with_retry(address: &str) -> io::Result<TcpStream> {
    let mut attempts = 0;
    loop {
        match TcpStream::connect(address) {
            Ok(stream) => return Ok(stream),
            Err(err) if attempts < 20 => {
                attempts += 1;
                thread::sleep(std::time::Duration::from_millis(100));
                let _ = err;
            }
            Err(err) => return Err(err),
        }
    }
}
