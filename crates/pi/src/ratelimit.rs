// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-bucket throttling for blob uploads.
//!
//! One limiter is shared by every blob response in the process, so the cap
//! bounds total egress rather than per-request throughput. Waits happen
//! inside the response body stream; a client hanging up drops the stream
//! and with it any wait in flight.

use std::num::NonZeroU32;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use governor::{Quota, RateLimiter};
use tokio::io::{AsyncRead, AsyncReadExt};

pub type BlobLimiter = governor::DefaultDirectRateLimiter;

/// Read chunk size for blob streaming.
const CHUNK_SIZE: u64 = 64 * 1024;

/// Build the process-wide blob limiter allowing `bytes_per_second` egress.
pub fn new_blob_limiter(bytes_per_second: u32) -> anyhow::Result<Arc<BlobLimiter>> {
    let rate = NonZeroU32::new(bytes_per_second)
        .ok_or_else(|| anyhow::anyhow!("blob rate limit must be positive"))?;
    Ok(Arc::new(RateLimiter::direct(Quota::per_second(rate))))
}

/// Stream at most `limit` bytes from `reader` through the limiter in
/// `CHUNK_SIZE` reads. `hold` travels with the stream and drops when the
/// body is done; the admission permit rides along in it so the slot stays
/// taken for the whole transfer.
pub fn limited_stream<R, H>(
    reader: R,
    limiter: Arc<BlobLimiter>,
    limit: u64,
    hold: H,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send
where
    R: AsyncRead + Send + Unpin + 'static,
    H: Send + 'static,
{
    futures_util::stream::unfold(
        Some((reader, limiter, limit, hold)),
        |state| async move {
            let (mut reader, limiter, remaining, hold) = state?;
            if remaining == 0 {
                return None;
            }

            let mut buf = vec![0u8; CHUNK_SIZE.min(remaining) as usize];
            match reader.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    if let Some(permits) = NonZeroU32::new(n as u32) {
                        // Only fails when a chunk exceeds the bucket's burst
                        // capacity; a chunk is 64 KiB, so treat it as free.
                        let _ = limiter.until_n_ready(permits).await;
                    }
                    buf.truncate(n);
                    let remaining = remaining - n as u64;
                    Some((Ok(Bytes::from(buf)), Some((reader, limiter, remaining, hold))))
                }
                Err(e) => Some((Err(e), None)),
            }
        },
    )
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
