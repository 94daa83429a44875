mod common;

use common::{connected, wait_buffered, WAIT};
use joycore_link::{CancellationToken, SerialError};

#[tokio::test]
async fn read_exact_returns_bytes_in_arrival_order() {
    let (mock, channel) = connected("mock-exact").await;
    mock.push(vec![1, 2, 3]);
    mock.push(vec![4, 5]);
    mock.push(vec![6, 7, 8, 9]);

    let token = CancellationToken::new();
    let first = tokio::time::timeout(WAIT, channel.read_exact(4, &token)).await.unwrap().unwrap();
    assert_eq!(&first[..], &[1, 2, 3, 4]);
    let second = tokio::time::timeout(WAIT, channel.read_exact(5, &token)).await.unwrap().unwrap();
    assert_eq!(&second[..], &[5, 6, 7, 8, 9]);
    assert_eq!(channel.buffered_len().await, 0);
}

#[tokio::test]
async fn read_until_splits_lines() {
    let (mock, channel) = connected("mock-lines").await;
    mock.push(b"abc\n".to_vec());
    mock.push(b"def\n".to_vec());

    let token = CancellationToken::new();
    let a = tokio::time::timeout(WAIT, channel.read_until(b'\n', &token)).await.unwrap().unwrap();
    let b = tokio::time::timeout(WAIT, channel.read_until(b'\n', &token)).await.unwrap().unwrap();
    assert_eq!(&a[..], b"abc\n");
    assert_eq!(&b[..], b"def\n");
}

#[tokio::test]
async fn delimiter_split_across_chunks() {
    let (mock, channel) = connected("mock-e2e").await;
    mock.push(vec![0x41, 0x42]);
    mock.push(vec![0x0A, 0x43]);

    let token = CancellationToken::new();
    let line = tokio::time::timeout(WAIT, channel.read_until(0x0A, &token)).await.unwrap().unwrap();
    assert_eq!(&line[..], &[0x41, 0x42, 0x0A]);
    let rest = tokio::time::timeout(WAIT, channel.read_exact(1, &token)).await.unwrap().unwrap();
    assert_eq!(&rest[..], &[0x43]);
}

#[tokio::test]
async fn cancelled_read_exact_does_not_touch_buffer() {
    let (mock, channel) = connected("mock-cancel").await;
    mock.push(vec![9, 8, 7]);
    wait_buffered(&channel, 3).await;

    let token = CancellationToken::new();
    token.cancel();
    let before = channel.buffered_len().await;
    let result = channel.read_exact(100, &token).await;
    assert!(matches!(result, Err(SerialError::Timeout)));
    assert_eq!(channel.buffered_len().await, before);
    assert_eq!(channel.metrics().read_timeouts, 1);
}

#[tokio::test]
async fn read_until_times_out_without_delimiter() {
    let (mock, channel) = connected("mock-nodelim").await;
    mock.push(b"partial".to_vec());
    wait_buffered(&channel, 7).await;

    let result = channel.read_until_timeout(b'\n', std::time::Duration::from_millis(30)).await;
    assert!(matches!(result, Err(SerialError::Timeout)));
    assert_eq!(channel.buffered_len().await, 7);

    mock.push(b"\n".to_vec());
    let line = channel.read_until_timeout(b'\n', WAIT).await.unwrap();
    assert_eq!(&line[..], b"partial\n");
}

#[tokio::test]
async fn read_exact_waits_for_late_bytes() {
    let (mock, channel) = connected("mock-late").await;
    let feeder = {
        let mock = mock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            mock.push(b"late".to_vec());
        })
    };
    let bytes = channel.read_exact_timeout(4, WAIT).await.unwrap();
    assert_eq!(&bytes[..], b"late");
    feeder.await.unwrap();
}

#[tokio::test]
async fn zero_length_read_is_immediate() {
    let (_mock, channel) = connected("mock-zero").await;
    let bytes = channel.read_exact(0, &CancellationToken::new()).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn swallowed_read_errors_do_not_lose_data() {
    let (mock, channel) = common::mock_channel("mock-flaky");
    mock.inject_read_errors(3);
    mock.push(b"ok\n".to_vec());
    channel.connect(&CancellationToken::new()).await.unwrap();

    let line = channel.read_until_timeout(b'\n', WAIT).await.unwrap();
    assert_eq!(&line[..], b"ok\n");
    assert!(channel.is_open());
    assert_eq!(channel.metrics().swallowed_read_errors, 3);
}

#[tokio::test]
async fn reads_fail_fast_when_closed() {
    let (_mock, channel) = common::mock_channel("mock-closed");
    let token = CancellationToken::new();
    assert!(matches!(channel.read_exact(1, &token).await, Err(SerialError::NotConnected)));
    assert!(matches!(channel.read_until(b'\n', &token).await, Err(SerialError::NotConnected)));
}
