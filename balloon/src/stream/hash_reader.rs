use std::marker::Unpin;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use digest::{Digest, Output as DigestOutput};
use tokio::io::{self, AsyncRead, ReadBuf};
use tokio::sync::OnceCell;

/// The digest of a fully-read stream.
#[derive(Debug, Clone)]
pub struct StreamDigest<D: Digest> {
    /// The finalized hash.
    pub hash: DigestOutput<D>,

    /// Number of bytes that went through the hasher.
    pub size: u64,
}

/// AsyncRead filter that hashes the bytes that have been read.
///
/// The digest is only available after EOF has been observed. If the
/// reader is dropped early, the cell stays empty.
pub struct StreamHasher<R, D>
where
    R: AsyncRead + Unpin,
    D: Digest + Unpin,
{
    inner: R,
    digest: Option<D>,
    size: u64,
    finalized: Arc<OnceCell<StreamDigest<D>>>,
}

impl<R, D> StreamHasher<R, D>
where
    R: AsyncRead + Unpin,
    D: Digest + Unpin,
{
    pub fn new(inner: R, digest: D) -> (Self, Arc<OnceCell<StreamDigest<D>>>) {
        let finalized = Arc::new(OnceCell::new());

        (
            Self {
                inner,
                digest: Some(digest),
                size: 0,
                finalized: finalized.clone(),
            },
            finalized,
        )
    }

    /// Returns the number of bytes hashed so far.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<R, D> AsyncRead for StreamHasher<R, D>
where
    R: AsyncRead + Unpin,
    D: Digest + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let old_filled = buf.filled().len();

        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read_len = buf.filled().len() - old_filled;
                let this = &mut *self;

                if read_len == 0 {
                    // EOF
                    if let Some(digest) = this.digest.take() {
                        let _ = this.finalized.set(StreamDigest {
                            hash: digest.finalize(),
                            size: this.size,
                        });
                    }
                } else {
                    let Some(digest) = this.digest.as_mut() else {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "Stream has data after EOF",
                        )));
                    };

                    digest.update(&buf.filled()[old_filled..]);
                    this.size += read_len as u64;
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
