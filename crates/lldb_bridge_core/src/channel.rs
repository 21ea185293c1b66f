//! Pseudo-terminal channel to the debugger process.
//!
//! The debugger only prints its prompt when attached to a terminal, so its
//! stdin/stdout/stderr are wired to the slave side of a pty and the engine
//! talks to the master side. [`Channel`] is also constructible over any
//! async byte stream, which is how sessions are driven in tests.

use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
use std::io;
use std::os::fd::AsFd;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("debugger output reached end of stream")]
    Eof,

    #[error("failed to allocate pseudo-terminal: {0}")]
    Open(String),

    #[error("pseudo-terminal IO failed: {0}")]
    Io(#[from] io::Error),
}

pub trait ByteStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ByteStream for T {}

pub struct Channel {
    stream: Option<Box<dyn ByteStream>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    /// Allocates a pty pair with echo disabled.
    ///
    /// The returned [`pty_process::Pts`] is consumed by
    /// [`pty_process::Command::spawn`], so the parent keeps no copy of it.
    pub fn open() -> Result<(Self, pty_process::Pts), ChannelError> {
        let (pty, pts) = pty_process::open().map_err(|e| ChannelError::Open(e.to_string()))?;
        disable_echo(&pty)?;
        tracing::debug!("Allocated pseudo-terminal pair");
        Ok((Self::from_stream(pty), pts))
    }

    pub fn from_stream(stream: impl ByteStream + 'static) -> Self {
        Self {
            stream: Some(Box::new(stream)),
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads whatever is available within `wait`.
    ///
    /// An empty result means nothing arrived before the deadline; it is not an
    /// error. A zero `wait` still returns bytes that are already buffered.
    pub async fn read(&mut self, wait: Duration) -> Result<Vec<u8>, ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        let mut buf = vec![0_u8; READ_CHUNK];
        match timeout(wait, stream.read(&mut buf)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(ChannelError::Eof),
            Ok(Ok(len)) => {
                buf.truncate(len);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ChannelError::Io(e)),
        }
    }

    /// Closes the master side. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed debugger channel");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Line discipline settings are shared by both ends, so the master fd works.
fn disable_echo(fd: impl AsFd) -> Result<(), ChannelError> {
    let mut termios = tcgetattr(&fd).map_err(io::Error::from)?;
    termios
        .local_flags
        .remove(LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHONL);
    tcsetattr(&fd, SetArg::TCSANOW, &termios).map_err(io::Error::from)?;
    Ok(())
}
