use crate::clock::RunClock;
use chrono::DateTime;
use chrono::Utc;
use std::io;
use std::pin::Pin;
use std::task::ready;
use std::task::Context;
use std::task::Poll;
use tokio::io::AsyncRead;
use tokio::io::ReadBuf;

/// Read-through wrapper that records when the first byte of a body arrived.
///
/// Until a byte has been seen, each read asks the inner reader for exactly one byte so the timestamp isn't delayed by filling a large buffer. After that, reads go straight through.
pub struct FirstByteReader<R> {
  inner: R,
  clock: RunClock,
  first_byte: Option<DateTime<Utc>>,
}

impl<R> FirstByteReader<R> {
  pub fn new(inner: R, clock: RunClock) -> Self {
    Self {
      inner,
      clock,
      first_byte: None,
    }
  }

  pub fn first_byte(&self) -> Option<DateTime<Utc>> {
    self.first_byte
  }
}

impl<R: AsyncRead + Unpin> AsyncRead for FirstByteReader<R> {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    let this = &mut *self;
    // An empty buffer can't receive the byte, so don't take it from the inner reader yet.
    if this.first_byte.is_some() || buf.remaining() == 0 {
      return Pin::new(&mut this.inner).poll_read(cx, buf);
    };
    let mut one = [0u8; 1];
    let mut one_buf = ReadBuf::new(&mut one);
    ready!(Pin::new(&mut this.inner).poll_read(cx, &mut one_buf))?;
    if !one_buf.filled().is_empty() {
      this.first_byte = Some(this.clock.now());
      buf.put_slice(one_buf.filled());
    };
    Poll::Ready(Ok(()))
  }
}
