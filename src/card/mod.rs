//! Card Orchestrator
//!
//! Ties the hardware together and runs the card's two execution contexts:
//!
//! - the firmware thread boots nothing (boot happens in [`Card::start`]),
//!   then loops draining MIDI IN and host bytes into the firmware, applying
//!   FM timer ticks and running housekeeping, then suspends on the
//!   host input buffer until a byte arrives or one loop period passes;
//! - the interrupt thread sleeps on a condition variable until the
//!   firmware interrupt line is high, then moves exactly one byte (or
//!   acknowledges one timer overflow) in the order MIDI IN, MIDI OUT, FM
//!   timer, host bus.
//!
//! `CardHardware` sits behind one `parking_lot::Mutex`; the four data-path
//! buffers lock themselves.

pub mod config;
pub mod hardware;
pub mod host;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::firmware::{Firmware, Outbox};
use crate::irq::Transitions;
use crate::midi::Source;
use crate::piu::{inte_bit, status, PIU_CONTROL, PIU_PORT_A, PIU_PORT_B};
use crate::sysex::Diagnostic;
use crate::transport::{BufferFlags, CyclicBuffer, DataPaths, MidiInError, UartErrors};
use crate::ym2164::registers::{timer_ctrl, REG_TIMER_CTRL};
use crate::Result;

pub use config::{BufferSizes, CardConfig};
pub use hardware::CardHardware;
pub use host::{HostIrq, HostLink, MidiSink, Unconnected};

/// Card PIU mode: port A strobed input, port B strobed output.
pub const CARD_PIU_MODE: u8 = 0xB4;

/// How long a MIDI IN byte waits for the UART holding register.
const UART_WAIT: Duration = Duration::from_millis(2);
/// Interrupt thread wake-up interval for noticing shutdown.
const IRQ_POLL: Duration = Duration::from_millis(20);
/// Input bytes handled per firmware loop iteration and source.
const INPUT_BURST: usize = 64;

struct Shared {
    hw: Mutex<CardHardware>,
    irq_cv: Condvar,
    uart_cv: Condvar,
    data: DataPaths,
    running: AtomicBool,
    host_irq: Arc<dyn HostIrq>,
    sink: Arc<dyn MidiSink>,
    output_timeout: Duration,
}

impl Shared {
    /// Re-evaluate the interrupt network and act on line changes. Called
    /// with the register lock held after every mutation.
    fn settle(&self, hw: &mut CardHardware) {
        hw.refresh();
        self.apply(hw.take_transitions());
        if hw.net.firmware_line() {
            self.irq_cv.notify_one();
        }
    }

    fn apply(&self, t: Transitions) {
        match t.host {
            Some(true) => self.host_irq.raise(),
            Some(false) => self.host_irq.lower(),
            None => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, CardHardware> {
        self.hw.lock()
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A running card.
pub struct Card {
    config: CardConfig,
    shared: Arc<Shared>,
    firmware: Option<JoinHandle<()>>,
    interrupt: Option<JoinHandle<()>>,
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("base_port", &self.config.base_port)
            .field("node", &self.config.node)
            .field("running", &self.shared.running())
            .finish()
    }
}

impl Card {
    /// Boot a card with no interrupt controller and no MIDI OUT wire.
    pub fn start(config: CardConfig) -> Result<Self> {
        Self::start_with(config, Arc::new(Unconnected), Arc::new(Unconnected))
    }

    /// Boot a card wired to `host_irq` and `sink`.
    pub fn start_with(
        config: CardConfig,
        host_irq: Arc<dyn HostIrq>,
        sink: Arc<dyn MidiSink>,
    ) -> Result<Self> {
        config.validate()?;
        let data = DataPaths::new(&config.buffers)?;
        let mut hw = CardHardware::new(&config);
        let mut firmware = Firmware::new(config.firmware_settings());

        hw.bus.card_write(PIU_CONTROL, CARD_PIU_MODE);
        hw.bus.card_write(PIU_CONTROL, (inte_bit::A_IN << 1) | 1);
        hw.bus.card_write(PIU_CONTROL, (inte_bit::B << 1) | 1);
        firmware.boot(&mut hw.ym);
        hw.refresh();
        hw.take_transitions();

        let shared = Arc::new(Shared {
            hw: Mutex::new(hw),
            irq_cv: Condvar::new(),
            uart_cv: Condvar::new(),
            data,
            running: AtomicBool::new(true),
            host_irq,
            sink,
            output_timeout: config.output_timeout(),
        });
        info!(
            "card at {:#06X} irq {} node {} started",
            config.base_port, config.irq, config.node
        );

        let sleep = config.firmware_sleep();
        let fw_shared = Arc::clone(&shared);
        let firmware = thread::Builder::new()
            .name("mfc-firmware".into())
            .spawn(move || firmware_loop(&fw_shared, firmware, sleep))?;
        let irq_shared = Arc::clone(&shared);
        let interrupt = thread::Builder::new()
            .name("mfc-interrupt".into())
            .spawn(move || interrupt_loop(&irq_shared))?;

        Ok(Self {
            config,
            shared,
            firmware: Some(firmware),
            interrupt: Some(interrupt),
        })
    }

    /// Configuration the card was started with.
    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    /// Host read of I/O port `port`. Ports outside the card window read 0xFF.
    pub fn io_read(&self, port: u16) -> u8 {
        let Some(offset) = self.config.port_offset(port) else {
            return 0xFF;
        };
        let mut hw = self.shared.lock();
        let value = hw.io_read(offset);
        self.shared.settle(&mut hw);
        value
    }

    /// Host write to I/O port `port`. Ports outside the card window are ignored.
    pub fn io_write(&self, port: u16, value: u8) {
        let Some(offset) = self.config.port_offset(port) else {
            return;
        };
        let mut hw = self.shared.lock();
        hw.io_write(offset, value);
        self.shared.settle(&mut hw);
    }

    /// Fill `out` with interleaved stereo frames, stepping the chip and the
    /// interval timer once per frame.
    pub fn render(&self, out: &mut [i16]) {
        let mut hw = self.shared.lock();
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = hw.render_frame();
            frame[0] = l;
            frame[1] = r;
            self.shared.apply(hw.take_transitions());
        }
        if hw.net.firmware_line() {
            self.shared.irq_cv.notify_one();
        }
    }

    /// A byte arrives on the MIDI IN wire.
    ///
    /// Waits briefly for the UART holding register; a byte that still finds
    /// it full is lost and latched as an overrun.
    pub fn midi_in(&self, byte: u8) {
        let mut hw = self.shared.lock();
        if !hw.uart.rx_free() {
            let _ = self
                .shared
                .uart_cv
                .wait_while_for(&mut hw, |hw| !hw.uart.rx_free(), UART_WAIT);
        }
        if !hw.uart.receive(byte) {
            warn!("MIDI IN overrun, {byte:02X} lost");
        }
        self.shared.settle(&mut hw);
    }

    /// A wire-level receive error on MIDI IN.
    pub fn midi_in_error(&self, error: MidiInError) {
        let mut hw = self.shared.lock();
        hw.uart.receive_error(error);
        self.shared.settle(&mut hw);
    }

    /// Sticky flags of the MIDI IN data path.
    pub fn midi_in_flags(&self) -> BufferFlags {
        self.shared.data.midi_in.flags()
    }

    /// Level of the host interrupt line.
    pub fn host_irq_line(&self) -> bool {
        self.shared.lock().net.host_line()
    }

    /// FM timer overflows serviced so far.
    pub fn ticks(&self) -> u64 {
        self.shared.lock().ticks
    }

    /// Run `f` on the hardware under the register lock.
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut CardHardware) -> R) -> R {
        let mut hw = self.shared.lock();
        let r = f(&mut hw);
        self.shared.settle(&mut hw);
        r
    }

    /// Stop both threads. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.data.wake_all();
        self.shared.irq_cv.notify_all();
        self.shared.uart_cv.notify_all();
        for handle in [self.firmware.take(), self.interrupt.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("card thread panicked");
            }
        }
        info!("card stopped");
    }
}

impl Drop for Card {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Push `bytes` into `buf`, kicking the drain side whenever the buffer
/// fills. Returns `false` if a push timed out and the buffer was reset.
fn push_all(shared: &Shared, buf: &CyclicBuffer, bytes: &[u8], kick: impl Fn(&Shared)) -> bool {
    for &b in bytes {
        if buf.try_push(b) {
            continue;
        }
        kick(shared);
        if !buf.push_timeout(b, shared.output_timeout) {
            warn!("{} overflow, buffer reset", buf.name());
            buf.reset();
            buf.set_flags(BufferFlags::OVERFLOW);
            return false;
        }
    }
    if !bytes.is_empty() {
        kick(shared);
    }
    true
}

fn kick_midi_out(shared: &Shared) {
    let mut hw = shared.lock();
    if !hw.uart.tx_ready() {
        hw.uart.set_tx_irq(true);
        shared.settle(&mut hw);
    }
}

fn kick_host_out(shared: &Shared) {
    let mut hw = shared.lock();
    if hw.bus.card.port_c() & status::INTE_B == 0 {
        hw.bus.card_write(PIU_CONTROL, (inte_bit::B << 1) | 1);
        shared.settle(&mut hw);
    }
}

fn kick_host_in(shared: &Shared) {
    if shared.data.host_in.is_full() {
        return;
    }
    let mut hw = shared.lock();
    if hw.bus.card.port_c() & status::INTE_A_IN == 0 {
        trace!("host input resumed");
        hw.bus.card_write(PIU_CONTROL, (inte_bit::A_IN << 1) | 1);
        shared.settle(&mut hw);
    }
}

/// Move the firmware's pending output into the data paths.
fn flush(shared: &Shared, fw: &Firmware, out: &mut Outbox) {
    while !out.is_empty() {
        let midi = std::mem::take(&mut out.midi_out);
        let host = std::mem::take(&mut out.host);
        if !push_all(shared, &shared.data.midi_out, &midi, kick_midi_out) {
            fw.transport_error(Diagnostic::MidiOutOverflow, out);
        }
        if !push_all(shared, &shared.data.host_out, &host, kick_host_out) {
            // the report itself would land in the buffer that just overflowed
            let mut report = Outbox::default();
            fw.transport_error(Diagnostic::HostOverflow, &mut report);
            out.host = report.host;
        }
    }
}

fn check_transport(shared: &Shared, fw: &Firmware, out: &mut Outbox) {
    let errors = shared.lock().uart.take_errors();
    if !errors.is_empty() {
        warn!("MIDI IN errors {errors:?}");
        shared.data.midi_in.set_flags(BufferFlags::READ_ERROR);
        if errors.contains(UartErrors::FRAMING) {
            fw.transport_error(Diagnostic::Framing, out);
        }
        if errors.contains(UartErrors::OVERRUN) {
            fw.transport_error(Diagnostic::Overrun, out);
        }
    }
    if shared.data.midi_in.flags().contains(BufferFlags::OVERFLOW) {
        shared.data.midi_in.clear_flags(BufferFlags::OVERFLOW);
        fw.transport_error(Diagnostic::MidiInOverflow, out);
    }
}

fn firmware_loop(shared: &Shared, mut fw: Firmware, sleep: Duration) {
    debug!("firmware thread running");
    let mut out = Outbox::default();
    while shared.running() {
        let now = Instant::now();
        check_transport(shared, &fw, &mut out);

        for (source, buf) in [
            (Source::MidiIn, &shared.data.midi_in),
            (Source::Host, &shared.data.host_in),
        ] {
            for _ in 0..INPUT_BURST {
                let Some(byte) = buf.try_pop() else {
                    break;
                };
                feed(shared, &mut fw, source, byte, now, &mut out);
            }
        }
        kick_host_in(shared);

        {
            let mut hw = shared.lock();
            while fw.ticks() < hw.ticks {
                fw.tick(&mut hw.ym);
            }
            shared.settle(&mut hw);
        }

        let chores = fw.housekeeping(now, &mut out);
        if chores.went_offline {
            shared.data.midi_in.set_flags(BufferFlags::OFFLINE);
        } else if !fw.is_offline() {
            shared.data.midi_in.clear_flags(BufferFlags::OFFLINE);
        }
        flush(shared, &fw, &mut out);

        // idle: suspend on host input for at most one loop period
        if shared.data.midi_in.is_empty() {
            if let Some(byte) = shared.data.host_in.pop_timeout(sleep) {
                feed(shared, &mut fw, Source::Host, byte, Instant::now(), &mut out);
            }
        } else {
            thread::yield_now();
        }
    }
    debug!("firmware thread stopped");
}

/// Hand one input byte to the firmware and flush what it produced.
fn feed(
    shared: &Shared,
    fw: &mut Firmware,
    source: Source,
    byte: u8,
    now: Instant,
    out: &mut Outbox,
) {
    {
        let mut hw = shared.lock();
        fw.receive(source, byte, now, &mut hw.ym, out);
        shared.settle(&mut hw);
    }
    flush(shared, fw, out);
}

/// What the interrupt thread decided to do with the lock released.
enum Service {
    MidiIn(u8),
    MidiOut(u8),
    None,
}

fn interrupt_loop(shared: &Shared) {
    debug!("interrupt thread running");
    let mut hw = shared.lock();
    while shared.running() {
        if !hw.net.firmware_line() {
            shared.irq_cv.wait_for(&mut hw, IRQ_POLL);
            continue;
        }
        let service = service_one(shared, &mut hw);
        shared.settle(&mut hw);
        match service {
            Service::MidiIn(byte) => {
                MutexGuard::unlocked(&mut hw, || {
                    let buf = &shared.data.midi_in;
                    if !buf.push_timeout(byte, shared.output_timeout) {
                        warn!("MIDI IN overflow, buffer reset");
                        buf.reset();
                        buf.set_flags(BufferFlags::OVERFLOW);
                    }
                });
            }
            Service::MidiOut(byte) => MutexGuard::unlocked(&mut hw, || shared.sink.send(byte)),
            Service::None => {}
        }
    }
    debug!("interrupt thread stopped");
}

/// Service the highest-priority pending source.
fn service_one(shared: &Shared, hw: &mut CardHardware) -> Service {
    let sources = hw.sources();
    if sources.uart_rx {
        let byte = hw.uart.read_rx();
        shared.uart_cv.notify_all();
        return byte.map_or(Service::None, Service::MidiIn);
    }
    if sources.uart_tx {
        return match shared.data.midi_out.try_pop() {
            Some(byte) => Service::MidiOut(byte),
            None => {
                hw.uart.set_tx_irq(false);
                Service::None
            }
        };
    }
    if sources.ym_irq {
        hw.ym.write_port(0, REG_TIMER_CTRL);
        hw.ym
            .write_port(1, timer_ctrl::LOAD_A | timer_ctrl::IRQ_A | timer_ctrl::RESET_A);
        hw.ticks += 1;
        return Service::None;
    }
    if sources.piu_intr_a {
        if shared.data.host_in.is_full() {
            trace!("host input paused");
            hw.bus.card_write(PIU_CONTROL, inte_bit::A_IN << 1);
        } else {
            let byte = hw.bus.card_read(PIU_PORT_A);
            shared.data.host_in.try_push(byte);
            if shared.data.host_in.is_full() {
                hw.bus.card_write(PIU_CONTROL, inte_bit::A_IN << 1);
            }
        }
        return Service::None;
    }
    if sources.piu_intr_b {
        match shared.data.host_out.try_pop() {
            Some(byte) => hw.bus.card_write(PIU_PORT_B, byte),
            None => hw.bus.card_write(PIU_CONTROL, inte_bit::B << 1),
        }
    }
    Service::None
}
