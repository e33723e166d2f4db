use std::{
    io::{ErrorKind, Read},
    net::TcpStream,
};

use byteorder::{BigEndian as BE, ByteOrder, ReadBytesExt};
use tracing::{info, warn};

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not connect to telemetry publisher at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("Telemetry stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {0} bytes exceeds the 1 MiB limit")]
    FrameTooLarge(usize),

    #[error("Channel name of {channel} bytes does not fit in a {frame} byte frame")]
    ChannelOverrun { channel: usize, frame: usize },

    #[error("Channel name is not valid UTF-8")]
    ChannelName,
}

/// One published message as it came off the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// A payload for the subscribed channel, numbered in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

/// Read the next frame. Returns `None` when the stream ends cleanly between frames. A stream
/// that ends part way through the length header is an error.
pub fn read_frame(reader: &mut impl Read) -> Result<Option<Frame>, TransportError> {
    let mut header = [0_u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }

    let len = BE::read_u32(&header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body)?;

    let mut body = body.as_slice();
    let channel_len = body.read_u16::<BE>()? as usize;
    if channel_len > body.len() {
        return Err(TransportError::ChannelOverrun {
            channel: channel_len,
            frame: len,
        });
    }

    let (channel, payload) = body.split_at(channel_len);
    let channel = std::str::from_utf8(channel)
        .map_err(|_| TransportError::ChannelName)?
        .to_string();

    Ok(Some(Frame {
        channel,
        payload: payload.to_vec(),
    }))
}

/// Filters a frame stream down to one channel.
pub struct Subscription<R: Read> {
    reader: R,
    channel: String,
    last_sequence: u64,
}

impl Subscription<TcpStream> {
    pub fn connect(addr: &str, channel: impl Into<String>) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;

        let channel = channel.into();
        info!("Subscribed to \"{channel}\" at {addr}");

        Ok(Self::new(stream, channel))
    }
}

impl<R: Read> Subscription<R> {
    pub fn new(reader: R, channel: impl Into<String>) -> Self {
        Self {
            reader,
            channel: channel.into(),
            last_sequence: 0,
        }
    }

    /// Block until the next payload on the channel arrives. `None` once the stream has ended.
    pub fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError> {
        while let Some(frame) = read_frame(&mut self.reader)? {
            if frame.channel != self.channel {
                continue;
            }

            self.last_sequence += 1;
            return Ok(Some(Delivery {
                sequence: self.last_sequence,
                payload: frame.payload,
            }));
        }

        Ok(None)
    }
}

/// Connect and read a subscription on its own thread, handing every delivery to `on_delivery`
/// until it returns `false`. `on_closed` runs once when the connection fails or ends; nothing
/// reconnects.
pub fn spawn_subscriber<R, S, D, C>(
    subscribe: S,
    mut on_delivery: D,
    on_closed: C,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    R: Read,
    S: FnOnce() -> Result<Subscription<R>, TransportError> + Send + 'static,
    D: FnMut(Delivery) -> bool + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name("telemetry".to_string())
        .spawn(move || {
            let mut subscription = match subscribe() {
                Ok(subscription) => subscription,
                Err(err) => {
                    warn!("{err}");
                    on_closed();
                    return;
                }
            };

            loop {
                match subscription.next_delivery() {
                    Ok(Some(delivery)) => {
                        // The receiver is gone, so is the application.
                        if !on_delivery(delivery) {
                            return;
                        }
                    }
                    Ok(None) => {
                        warn!("Telemetry publisher closed the connection");
                        break;
                    }
                    Err(err) => {
                        warn!("Telemetry subscription ended: {err}");
                        break;
                    }
                }
            }
            on_closed();
        })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use byteorder::WriteBytesExt;

    use super::*;

    fn encode_frame(channel: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BE>((2 + channel.len() + payload.len()) as u32)
            .unwrap();
        out.write_u16::<BE>(channel.len() as u16).unwrap();
        out.extend_from_slice(channel.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn reads_frames_until_eof() {
        let mut data = encode_frame("robot/joints", br#"{"joints":[1]}"#);
        data.extend(encode_frame("other", b"x"));
        let mut reader = Cursor::new(data);

        let frame = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(frame.channel, "robot/joints");
        assert_eq!(frame.payload, br#"{"joints":[1]}"#);

        let frame = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(frame.channel, "other");

        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn oversized_and_truncated_frames_fail() {
        let mut data = Vec::new();
        data.write_u32::<BE>(MAX_FRAME_SIZE as u32 + 1).unwrap();
        assert!(matches!(
            read_frame(&mut Cursor::new(data)),
            Err(TransportError::FrameTooLarge(_))
        ));

        let mut data = encode_frame("robot/joints", b"payload");
        data.truncate(data.len() - 3);
        assert!(matches!(
            read_frame(&mut Cursor::new(data)),
            Err(TransportError::Io(_))
        ));

        let mut data = Vec::new();
        data.write_u32::<BE>(4).unwrap();
        data.write_u16::<BE>(10).unwrap();
        data.extend_from_slice(b"ab");
        assert!(matches!(
            read_frame(&mut Cursor::new(data)),
            Err(TransportError::ChannelOverrun { channel: 10, frame: 4 })
        ));
    }

    #[test]
    fn stream_cut_inside_the_length_header_is_an_error() {
        assert!(read_frame(&mut Cursor::new(Vec::new())).unwrap().is_none());

        let result = read_frame(&mut Cursor::new(vec![0, 0]));
        assert!(matches!(
            result,
            Err(TransportError::Io(ref err)) if err.kind() == ErrorKind::UnexpectedEof
        ));

        let mut data = encode_frame("robot/joints", b"a");
        data.extend_from_slice(&[0, 0, 0]);
        let mut reader = Cursor::new(data);
        assert!(read_frame(&mut reader).unwrap().is_some());
        assert!(read_frame(&mut reader).is_err());
    }

    #[test]
    fn subscription_filters_and_numbers_deliveries() {
        let mut data = encode_frame("robot/joints", b"a");
        data.extend(encode_frame("robot/status", b"ignored"));
        data.extend(encode_frame("robot/joints", b"b"));

        let mut subscription = Subscription::new(Cursor::new(data), "robot/joints");

        assert_eq!(
            subscription.next_delivery().unwrap(),
            Some(Delivery {
                sequence: 1,
                payload: b"a".to_vec()
            })
        );
        assert_eq!(
            subscription.next_delivery().unwrap(),
            Some(Delivery {
                sequence: 2,
                payload: b"b".to_vec()
            })
        );
        assert_eq!(subscription.next_delivery().unwrap(), None);
    }

    #[test]
    fn subscriber_thread_forwards_then_closes() {
        let mut data = encode_frame("robot/joints", b"a");
        data.extend(encode_frame("robot/joints", b"b"));

        let (sender, receiver) = std::sync::mpsc::channel();
        let closed = sender.clone();

        let handle = spawn_subscriber(
            move || Ok(Subscription::new(Cursor::new(data), "robot/joints")),
            move |delivery| sender.send(Some(delivery.sequence)).is_ok(),
            move || {
                let _ = closed.send(None);
            },
        )
        .unwrap();
        handle.join().unwrap();

        let received = receiver.try_iter().collect::<Vec<_>>();
        assert_eq!(received, vec![Some(1), Some(2), None]);
    }

    #[test]
    fn failed_connection_still_reports_closed() {
        let (sender, receiver) = std::sync::mpsc::channel();

        let handle = spawn_subscriber(
            || -> Result<Subscription<Cursor<Vec<u8>>>, TransportError> {
                Err(TransportError::ChannelName)
            },
            |_| true,
            move || {
                let _ = sender.send(());
            },
        )
        .unwrap();
        handle.join().unwrap();

        assert_eq!(receiver.try_iter().count(), 1);
    }
}
