use std::io;
use std::time::Duration;

use wimod_serial::hci::SerialPort;
use wimod_serial::lorawan::LoRaWanModem;

const PORT_NAME: &'static str = "/dev/ttyUSB0";

struct StdoutLogger;

impl log::Log for StdoutLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        println!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StdoutLogger = StdoutLogger;

/// Write half of the serial line handed to the modem stack.
struct PortSink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPort for PortSink {
    fn write_byte(&mut self, byte: u8) {
        self.port.write_all(&[byte]).expect("serial write failed");
    }
}

fn main() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(log::LevelFilter::Debug);

    let port = serialport::new(PORT_NAME, 115_200)
        .timeout(Duration::from_millis(10))
        .open();

    match port {
        Ok(mut port) => {
            let writer = port.try_clone().expect("could not clone serial port");
            let mut modem = LoRaWanModem::new(PortSink { port: writer });

            modem.send_ping().unwrap();
            modem.get_firmware_version().unwrap();
            modem.get_device_eui().unwrap();

            let mut serial_buf: Vec<u8> = vec![0; 256];
            loop {
                match port.read(serial_buf.as_mut_slice()) {
                    Ok(t) => modem.process_rx_data(&serial_buf[..t]),
                    Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
                    Err(e) => eprintln!("{:?}", e),
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to open \"{}\". Error: {}", PORT_NAME, e);
            ::std::process::exit(1);
        }
    }
}
