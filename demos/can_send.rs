//! Send a burst of frames on the first available channel.
//!
//! Run with `cargo run --example can_send`.

use usbcan::{BitrateSelect, CanDriver, CanError, CanMessage, MODE_DEFAULT};

fn main() -> usbcan::Result<()> {
    env_logger::init();

    let driver = CanDriver::new()?;
    let channels = driver.channels();
    if channels.is_empty() {
        eprintln!("no supported CAN adapter attached");
        return Err(CanError::NotInitialized);
    }
    println!("found {} channel(s), using channel 0", channels.len());

    let handle = driver.init(0, MODE_DEFAULT)?;
    driver.start(handle, BitrateSelect::Index(-3))?; // 250 kbit/s

    for seq in 0..10u8 {
        let msg = CanMessage::new(0x123, &[seq, 0x11, 0x22, 0x33]);
        match driver.write(handle, &msg, 100) {
            Ok(()) => println!("sent {}", msg),
            Err(CanError::TransmitterBusy) => eprintln!("transmitter busy, frame dropped"),
            Err(err) => {
                driver.exit(handle)?;
                return Err(err);
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let counters = driver.counters(handle)?;
    println!("{} frame(s) transmitted", counters.tx);
    driver.exit(handle)
}
