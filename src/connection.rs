use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::config::ConnectOptions;
use crate::errors::ConnectError;

/// Any byte stream a connection can run over: plain TCP or TLS on top of it.
pub(crate) trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> IoStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A stream split into length-prefixed frames (4-byte big-endian length).
pub(crate) type FramedStream = Framed<Box<dyn IoStream>, LengthDelimitedCodec>;

pub(crate) fn framed(stream: Box<dyn IoStream>, max_frame_length: usize) -> FramedStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec();
    Framed::new(stream, codec)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Dials `addr` and completes the optional TLS handshake, all within `options.timeout`.
pub(crate) async fn establish(
    addr: &str,
    options: &ConnectOptions,
) -> Result<FramedStream, ConnectError> {
    let dial = async {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| ConnectError::from_io(addr, e, options.timeout))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(addr, error = %e, "could not disable Nagle");
        }

        let stream: Box<dyn IoStream> = match &options.tls {
            Some(tls) => {
                let stream = tls
                    .connector()
                    .connect(tls.server_name(), tcp)
                    .await
                    .map_err(|e| ConnectError::Tls {
                        addr: addr.to_string(),
                        reason: e.to_string(),
                    })?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };
        Ok(framed(stream, options.max_frame_length))
    };

    match tokio::time::timeout(options.timeout, dial).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::Timeout {
            addr: addr.to_string(),
            timeout: options.timeout,
        }),
    }
}
