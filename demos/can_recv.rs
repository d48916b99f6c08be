//! Print every frame received on the first available channel.
//!
//! Run with `cargo run --example can_recv`.

use usbcan::{BitrateSelect, CanDriver, CanError, MODE_DEFAULT};

fn main() -> usbcan::Result<()> {
    env_logger::init();

    let driver = CanDriver::new()?;
    if driver.channels().is_empty() {
        eprintln!("no supported CAN adapter attached");
        return Err(CanError::NotInitialized);
    }

    let handle = driver.init(0, MODE_DEFAULT)?;
    driver.start(handle, BitrateSelect::Index(-3))?; // 250 kbit/s
    println!("listening, press Ctrl-C to stop");

    loop {
        match driver.read(handle, 1000) {
            Ok(msg) => println!("{:>10} us  {}", msg.timestamp_us, msg),
            Err(CanError::ReceiverEmpty) => continue,
            Err(err) => {
                driver.exit(handle)?;
                return Err(err);
            }
        }
    }
}
