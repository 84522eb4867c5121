use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use wimod_serial::hci::SerialPort;
use wimod_serial::lorawan::LoRaWanModem;

const PORT_NAME: &'static str = "/dev/ttyUSB0";
const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

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

static JOINED: AtomicBool = AtomicBool::new(false);

fn network_joined() {
    JOINED.store(true, Ordering::SeqCst);
}

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
    log::set_max_level(log::LevelFilter::Info);

    let mut port = serialport::new(PORT_NAME, 115_200)
        .timeout(Duration::from_millis(10))
        .open()
        .unwrap_or_else(|e| {
            eprintln!("Failed to open \"{}\". Error: {}", PORT_NAME, e);
            ::std::process::exit(1);
        });

    let writer = port.try_clone().expect("could not clone serial port");
    let mut modem = LoRaWanModem::new(PortSink { port: writer });

    modem.join_network(Some(network_joined)).unwrap();

    let started = Instant::now();
    let mut serial_buf: Vec<u8> = vec![0; 256];
    let mut sent = false;
    loop {
        match port.read(serial_buf.as_mut_slice()) {
            Ok(t) => modem.process_rx_data(&serial_buf[..t]),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
            Err(e) => eprintln!("{:?}", e),
        }

        if JOINED.load(Ordering::SeqCst) && !sent {
            modem
                .send_unconfirmed_data(1, &[0x11, 0x22, 0x33])
                .unwrap();
            sent = true;
            println!("uplink queued, waiting for the tx indication");
        }

        if started.elapsed() > JOIN_TIMEOUT {
            if !sent {
                eprintln!("no join indication within {:?}", JOIN_TIMEOUT);
            }
            break;
        }
    }
}
