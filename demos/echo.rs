//! Minimal serial echo: prints whatever arrives and sends a greeting.
//!
//! Usage: `cargo run --example echo [device]` (defaults to /dev/ttyUSB0).

use std::env;
use std::time::Duration;

use serline::SerialBuilder;

fn main() -> Result<(), serline::Error> {
    let device = env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let serial = SerialBuilder::new()
        .device(device)
        .baud_rate(115200)
        .on_read(|data| {
            println!("read {} bytes: {}", data.len(), String::from_utf8_lossy(data));
        })
        .on_write(|n| println!("wrote {n} bytes"))
        .on_error(|e| eprintln!("I/O error {e}"))
        .build()?;

    serial.start_read()?;
    serial.send(b"hello from serline\r\n")?;

    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}
