// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use futures_util::StreamExt;

use super::{limited_stream, new_blob_limiter};

async fn collect(stream: impl futures_util::Stream<Item = std::io::Result<bytes::Bytes>>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn streams_all_bytes_through() {
    let data: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
    let limiter = new_blob_limiter(u32::MAX).unwrap();

    let reader = std::io::Cursor::new(data.clone());
    let out = collect(limited_stream(reader, limiter, data.len() as u64, ())).await;
    assert_eq!(out, data);
}

#[tokio::test]
async fn stops_at_the_byte_limit() {
    let data = vec![7u8; 100_000];
    let limiter = new_blob_limiter(u32::MAX).unwrap();

    let reader = std::io::Cursor::new(data);
    let out = collect(limited_stream(reader, limiter, 70_000, ())).await;
    assert_eq!(out.len(), 70_000);
}

#[tokio::test]
async fn short_reader_ends_the_stream_early() {
    let data = vec![1u8; 1000];
    let limiter = new_blob_limiter(u32::MAX).unwrap();

    let reader = std::io::Cursor::new(data);
    let out = collect(limited_stream(reader, limiter, 5000, ())).await;
    assert_eq!(out.len(), 1000);
}

#[tokio::test]
async fn hold_is_released_when_the_stream_is_dropped() {
    let limiter = new_blob_limiter(u32::MAX).unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    struct DropSignal(Option<tokio::sync::oneshot::Sender<()>>);
    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    let reader = std::io::Cursor::new(vec![0u8; 10]);
    let stream = limited_stream(reader, limiter, 10, DropSignal(Some(tx)));
    drop(stream);

    rx.await.expect("hold must drop with the stream");
}

#[test]
fn zero_rate_is_rejected() {
    assert!(new_blob_limiter(0).is_err());
}
