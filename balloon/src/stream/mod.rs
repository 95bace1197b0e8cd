//! Stream utilities.

mod hash_reader;

use std::collections::VecDeque;
use std::future::Future;
use std::marker::Unpin;
use std::pin::Pin;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::spawn;

pub use hash_reader::{StreamDigest, StreamHasher};

/// Merges chunks lazily into a continuous stream.
///
/// For each chunk, `streamer` is called to turn it into a
/// `Stream<Item = Result<Bytes>>`, typically by fetching the chunk
/// row from the database.
///
/// Up to `num_prefetch` chunks are requested ahead of the one being
/// yielded so that the merged stream doesn't stall on every chunk
/// boundary, while never holding more than that many chunks in memory:
///
/// ```text
/// | fetch | chunk 0 | chunk 1 | chunk 2 | chunk 3
/// | fetch |-------------^         ^         ^
///           | fetch |-------------|         |
///                     | fetch |-------------|
/// ```
///
/// An empty `chunks` queue yields an empty stream.
pub fn merge_chunks<C, F, S, Fut, E>(
    mut chunks: VecDeque<C>,
    streamer: F,
    streamer_arg: S,
    num_prefetch: usize,
) -> Pin<Box<impl Stream<Item = Result<Bytes, E>>>>
where
    F: Fn(C, S) -> Fut,
    S: Clone,
    Fut: Future<Output = Result<BoxStream<'static, Result<Bytes, E>>, E>> + Send + 'static,
    E: Send + 'static,
{
    let num_prefetch = num_prefetch.max(1);

    let s = try_stream! {
        let mut pending = VecDeque::new();

        loop {
            while pending.len() < num_prefetch {
                match chunks.pop_front() {
                    Some(chunk) => pending.push_back(spawn(streamer(chunk, streamer_arg.clone()))),
                    None => break,
                }
            }

            let handle = match pending.pop_front() {
                Some(handle) => handle,
                None => break, // we are done!
            };

            let mut stream = handle.await.expect("Chunk fetch task panicked")?;
            while let Some(item) = stream.next().await {
                let item = item?;
                yield item;
            }
        }
    };

    Box::pin(s)
}

/// Greedily reads from a stream to fill a buffer.
///
/// Returns fewer bytes than the buffer's capacity only at EOF.
pub async fn read_chunk_async<S: AsyncRead + Unpin + Send>(
    stream: &mut S,
    mut chunk: BytesMut,
) -> std::io::Result<Bytes> {
    while chunk.len() < chunk.capacity() {
        let read = stream.read_buf(&mut chunk).await?;

        if read == 0 {
            break;
        }
    }

    Ok(chunk.freeze())
}
