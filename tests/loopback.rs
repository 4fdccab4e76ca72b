//! Integration tests: serial engine over a pseudo-terminal loopback.
//!
//! Each test opens a pty pair, builds a `Serial` on the slave side, and
//! drives traffic from the master side with plain blocking reads and writes.
//! The slave is configured raw by the builder, so the pair is byte-transparent
//! in both directions.

use std::ffi::CStr;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serline::{Serial, SerialBuilder};

// ── Helpers ─────────────────────────────────────────────────────────

/// Open a pty pair. Returns the master end and the slave device path.
fn open_pty() -> (File, String) {
    unsafe {
        let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
        assert!(master >= 0, "posix_openpt failed");
        assert_eq!(libc::grantpt(master), 0, "grantpt failed");
        assert_eq!(libc::unlockpt(master), 0, "unlockpt failed");

        let mut name = [0 as libc::c_char; 128];
        assert_eq!(
            libc::ptsname_r(master, name.as_mut_ptr(), name.len()),
            0,
            "ptsname_r failed"
        );
        let path = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();
        (File::from_raw_fd(master), path)
    }
}

/// Build a `Serial` on the slave side of a fresh pty pair, collecting read
/// bytes into the returned buffer.
fn open_loopback() -> (File, Serial, Arc<Mutex<Vec<u8>>>) {
    let (master, path) = open_pty();
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let rx = Arc::clone(&received);
    let serial = SerialBuilder::new()
        .device(path.as_str())
        .baud_rate(115200)
        .on_read(move |data| rx.lock().unwrap().extend_from_slice(data))
        .build()
        .expect("failed to open pty slave");
    (master, serial, received)
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    pred()
}

/// Read from the master until `want` bytes arrived or the timeout elapses.
fn drain_master(master: &mut File, want: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::with_capacity(want);
    let mut chunk = [0u8; 4096];
    while out.len() < want && Instant::now() < deadline {
        match master.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO: the slave side went away; whatever was buffered is drained.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => panic!("master read error: {e}"),
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn echo_round_trip() {
    let (mut master, serial, received) = open_loopback();
    serial.start_read().unwrap();

    master.write_all(b"hello-test").unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || received.lock().unwrap().len() >= 10),
        "read callback never saw the payload"
    );
    assert_eq!(received.lock().unwrap().as_slice(), b"hello-test");
}

#[test]
fn framed_stream_arrives_in_order() {
    const FRAMES: u64 = 1000;
    const FRAME_LEN: usize = 32;

    let (mut master, serial, received) = open_loopback();
    serial.start_read().unwrap();

    let writer = thread::spawn(move || {
        for seq in 0..FRAMES {
            let mut frame = Vec::with_capacity(FRAME_LEN);
            frame.extend_from_slice(&seq.to_le_bytes());
            frame.extend_from_slice(&0u64.to_le_bytes());
            frame.extend_from_slice(&[seq as u8; 16]);
            master.write_all(&frame).unwrap();
        }
        master
    });

    let total = FRAMES as usize * FRAME_LEN;
    assert!(
        wait_until(Duration::from_secs(10), || received.lock().unwrap().len() >= total),
        "stream did not arrive in time"
    );
    let _master = writer.join().unwrap();

    let bytes = received.lock().unwrap();
    assert_eq!(bytes.len(), total);
    for (i, frame) in bytes.chunks(FRAME_LEN).enumerate() {
        let seq = u64::from_le_bytes(frame[..8].try_into().unwrap());
        assert_eq!(seq, i as u64, "frame {i} out of order");
        assert_eq!(&frame[16..], &[seq as u8; 16]);
    }
}

#[test]
fn large_write_completes_exactly_once() {
    const LEN: usize = 100_000;

    let (mut master, path) = open_pty();
    let completions = Arc::new(AtomicUsize::new(0));
    let last_result = Arc::new(AtomicIsize::new(-1));

    let serial = {
        let completions = Arc::clone(&completions);
        let last_result = Arc::clone(&last_result);
        SerialBuilder::new()
            .device(path.as_str())
            .baud_rate(115200)
            .on_write(move |n| {
                completions.fetch_add(1, Ordering::SeqCst);
                last_result.store(n, Ordering::SeqCst);
            })
            .build()
            .expect("failed to open pty slave")
    };

    let payload: Vec<u8> = (0..LEN).map(|i| (i % 251) as u8).collect();
    serial.send(&payload).unwrap();

    // The pty buffer is far smaller than the payload; the write only makes
    // progress while the master drains.
    let echoed = drain_master(&mut master, LEN, Duration::from_secs(10));
    assert_eq!(echoed.len(), LEN);
    assert_eq!(echoed, payload);

    assert!(
        wait_until(Duration::from_secs(2), || {
            completions.load(Ordering::SeqCst) == 1
        }),
        "write callback never fired"
    );
    assert_eq!(last_result.load(Ordering::SeqCst), LEN as isize);

    // No second callback shows up afterwards.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn zero_length_send_completes_with_zero() {
    let (_master, path) = open_pty();
    let completions = Arc::new(AtomicUsize::new(0));
    let last_result = Arc::new(AtomicIsize::new(-1));

    let serial = {
        let completions = Arc::clone(&completions);
        let last_result = Arc::clone(&last_result);
        SerialBuilder::new()
            .device(path.as_str())
            .baud_rate(115200)
            .on_write(move |n| {
                completions.fetch_add(1, Ordering::SeqCst);
                last_result.store(n, Ordering::SeqCst);
            })
            .build()
            .expect("failed to open pty slave")
    };

    serial.send(b"").unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            completions.load(Ordering::SeqCst) == 1
        }),
        "zero-length write never completed"
    );
    assert_eq!(last_result.load(Ordering::SeqCst), 0);
}

#[test]
fn callback_hot_swap_loses_nothing() {
    const CHUNK: usize = 64;
    const CHUNKS_PER_PHASE: usize = 10;

    let (mut master, path) = open_pty();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let serial = {
        let bytes = Arc::clone(&first);
        SerialBuilder::new()
            .device(path.as_str())
            .baud_rate(115200)
            .on_read(move |data| {
                bytes.fetch_add(data.len(), Ordering::SeqCst);
            })
            .build()
            .expect("failed to open pty slave")
    };
    serial.start_read().unwrap();

    let phase = CHUNK * CHUNKS_PER_PHASE;
    for _ in 0..CHUNKS_PER_PHASE {
        master.write_all(&[0xA5u8; CHUNK]).unwrap();
    }
    assert!(
        wait_until(Duration::from_secs(5), || {
            first.load(Ordering::SeqCst) >= phase
        }),
        "first callback never saw the first phase"
    );

    // Quiescent point: everything written so far has been dispatched, so the
    // swap cannot race an in-flight invocation of the first callback.
    {
        let bytes = Arc::clone(&second);
        serial.set_read_callback(move |data| {
            bytes.fetch_add(data.len(), Ordering::SeqCst);
        });
    }

    for _ in 0..CHUNKS_PER_PHASE {
        master.write_all(&[0x5Au8; CHUNK]).unwrap();
    }
    assert!(
        wait_until(Duration::from_secs(5), || {
            second.load(Ordering::SeqCst) >= phase
        }),
        "second callback never saw the second phase"
    );

    assert_eq!(first.load(Ordering::SeqCst), phase);
    assert_eq!(second.load(Ordering::SeqCst), phase);
}

#[test]
fn stop_read_is_idempotent_and_allows_one_trailing_dispatch() {
    let (mut master, path) = open_pty();
    let dispatches = Arc::new(AtomicUsize::new(0));

    let serial = {
        let dispatches = Arc::clone(&dispatches);
        SerialBuilder::new()
            .device(path.as_str())
            .baud_rate(115200)
            .on_read(move |_| {
                dispatches.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("failed to open pty slave")
    };
    serial.start_read().unwrap();

    master.write_all(b"first").unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            dispatches.load(Ordering::SeqCst) >= 1
        }),
        "initial read never dispatched"
    );

    serial.stop_read();
    serial.stop_read();
    thread::sleep(Duration::from_millis(50));
    let before = dispatches.load(Ordering::SeqCst);

    // The read re-armed before stop_read may still complete once; nothing
    // re-arms after it.
    master.write_all(b"second").unwrap();
    thread::sleep(Duration::from_millis(100));
    master.write_all(b"third").unwrap();
    thread::sleep(Duration::from_millis(200));

    let after = dispatches.load(Ordering::SeqCst);
    assert!(
        after - before <= 1,
        "expected at most one trailing dispatch, got {}",
        after - before
    );
}

#[test]
fn drop_during_io_shuts_down_cleanly() {
    let (mut master, serial, _received) = open_loopback();
    serial.start_read().unwrap();

    // Keep traffic moving in both directions while the handle goes away.
    for i in 0..50u8 {
        master.write_all(&[i; 16]).unwrap();
        serial.send(&[i; 16]).unwrap();
    }
    drop(serial);

    // Reaching this point means the worker joined without deadlocking. The
    // master may see EIO now that the slave side is closed.
    let _ = master.write_all(b"after");
}

#[test]
fn flooded_sends_are_completed_or_reported_dropped() {
    const SENDS: usize = 500;
    const CHUNK: usize = 64;

    let (mut master, path) = open_pty();
    let completed = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    let serial = {
        let completed = Arc::clone(&completed);
        let dropped = Arc::clone(&dropped);
        SerialBuilder::new()
            .device(path.as_str())
            .baud_rate(115200)
            .on_write(move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |e| {
                assert_eq!(e, -(libc::EAGAIN as isize));
                dropped.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("failed to open pty slave")
    };

    // Drain the master side so flooded writes can make progress.
    let drainer = thread::spawn(move || drain_master(&mut master, SENDS * CHUNK, Duration::from_secs(10)));

    for i in 0..SENDS {
        serial.send(&[i as u8; CHUNK]).unwrap();
    }

    // Every send is accounted for exactly once: a final write callback or a
    // drop notification.
    assert!(
        wait_until(Duration::from_secs(10), || {
            completed.load(Ordering::SeqCst) + dropped.load(Ordering::SeqCst) == SENDS
        }),
        "sends lost: {} completed, {} dropped",
        completed.load(Ordering::SeqCst),
        dropped.load(Ordering::SeqCst)
    );

    // Closing the slave unblocks the drainer if any sends were dropped.
    let final_completed = completed.load(Ordering::SeqCst);
    drop(serial);

    let echoed = drainer.join().unwrap();
    assert_eq!(echoed.len(), final_completed * CHUNK);
}

#[test]
fn read_callback_panic_does_not_kill_the_loop() {
    let (mut master, path) = open_pty();
    let dispatches = Arc::new(AtomicUsize::new(0));

    let serial = {
        let dispatches = Arc::clone(&dispatches);
        SerialBuilder::new()
            .device(path.as_str())
            .baud_rate(115200)
            .on_read(move |_| {
                dispatches.fetch_add(1, Ordering::SeqCst);
                panic!("user callback misbehaves");
            })
            .build()
            .expect("failed to open pty slave")
    };
    serial.start_read().unwrap();

    master.write_all(b"one").unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        dispatches.load(Ordering::SeqCst) >= 1
    }));

    // The loop survived the panic and re-armed the read.
    master.write_all(b"two").unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            dispatches.load(Ordering::SeqCst) >= 2
        }),
        "completion loop died after a callback panic"
    );
}
