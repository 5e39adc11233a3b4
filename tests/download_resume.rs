//! Drives the HTTP download driver against a hand-rolled HTTP/1.1 server
//! on a loopback socket: the first response is cut short after 100 bytes
//! (simulating a force-closed connection), and the second, started by
//! `reconnect`, resumes from `Range: bytes=100-`.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lwm2m_core::download::{DownloadConfig, HttpTransfer, Transfer, TransferStatus};

fn body_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn read_request_headers(stream: &mut std::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).unwrap() == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[tokio::test]
async fn http_download_resumes_after_a_force_closed_connection() {
    let full = body_bytes(1000);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_full = full.clone();
    let server = std::thread::spawn(move || {
        // First connection: announce the full length, send only the first
        // 100 bytes, then drop the socket.
        let (mut stream, _) = listener.accept().unwrap();
        let _ = read_request_headers(&mut stream);
        let header = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", server_full.len());
        stream.write_all(header.as_bytes()).unwrap();
        stream.write_all(&server_full[..100]).unwrap();
        drop(stream);

        // Second connection: resume from byte 100.
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request_headers(&mut stream);
        assert!(request.contains("Range: bytes=100-"));
        let remaining = &server_full[100..];
        let header = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 100-999/1000\r\nContent-Length: {}\r\n\r\n",
            remaining.len()
        );
        stream.write_all(header.as_bytes()).unwrap();
        stream.write_all(remaining).unwrap();
    });

    let received = Arc::new(Mutex::new(Vec::new()));
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let received_cb = received.clone();
    let on_block = Arc::new(move |chunk: &[u8]| -> lwm2m_core::Result<()> {
        received_cb.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    });
    let statuses_cb = statuses.clone();
    let on_finish = Arc::new(move |status: TransferStatus| {
        statuses_cb.lock().unwrap().push(status);
    });

    let client = reqwest::Client::new();
    let config = DownloadConfig {
        url: format!("http://{addr}/firmware.bin"),
        etag: None,
        start_offset: 0,
        idle_timeout: Duration::from_secs(5),
    };
    let mut transfer = HttpTransfer::spawn(client, config, on_block, on_finish);

    // Wait for the first (failed, truncated) attempt to finish.
    for _ in 0..200 {
        if !statuses.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(statuses.lock().unwrap().len(), 1);
    assert!(matches!(statuses.lock().unwrap()[0], TransferStatus::Failed(_)));
    assert_eq!(received.lock().unwrap().len(), 100);

    transfer.reconnect().unwrap();

    for _ in 0..200 {
        if statuses.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    server.join().unwrap();

    let final_statuses = statuses.lock().unwrap();
    assert_eq!(final_statuses.len(), 2);
    assert_eq!(final_statuses[1], TransferStatus::Finished);
    assert_eq!(*received.lock().unwrap(), full);
}
