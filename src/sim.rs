//! Simulated USART
//!
//! Register-level model of the USART in synchronous master mode, used by the
//! tests in place of real hardware. A frame written to TXDATA completes after
//! a programmable number of STATUS reads; the byte shifted in is the frame
//! itself in loopback mode, otherwise the next byte queued on MISO.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::{Deque, Vec};

use crate::cs::ChipSelect;
use crate::gpio::{Level, Pin, PinConfigurator, PinMode};
use crate::rcc::{ClockControl, ClockId};
use crate::regs::*;
use crate::spi::Error;

pub const LOG_CAPACITY: usize = 256;
/// Receive buffer depth of the USART (RXDATA plus one buffered frame).
pub const RX_DEPTH: usize = 2;
const MISO_CAPACITY: usize = 64;
/// MISO floats high when no slave drives it.
const IDLE_MISO: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Write(Reg, u32),
    Read(Reg, u32),
    Select(u8),
    Deselect(u8),
}

#[derive(Clone, Copy)]
struct Shifting {
    byte: u8,
    remaining: u32,
}

struct State {
    ctrl: u32,
    frame: u32,
    clkdiv: u32,
    routepen: u32,
    routeloc0: u32,
    routeloc1: u32,
    status: Status,
    shifting: Option<Shifting>,
    rx: Deque<u8, RX_DEPTH>,
    miso: Deque<u8, MISO_CAPACITY>,
    latency: u32,
    stalled: bool,
    frames_started: u32,
    overflows: u32,
    log: Vec<Event, LOG_CAPACITY>,
}

impl State {
    fn new() -> Self {
        Self {
            ctrl: 0,
            frame: 0x0000_1005,
            clkdiv: 0,
            routepen: 0,
            routeloc0: 0,
            routeloc1: ROUTELOC1_RESETVALUE,
            status: Status::from(STATUS_RESETVALUE),
            shifting: None,
            rx: Deque::new(),
            miso: Deque::new(),
            latency: 1,
            stalled: false,
            frames_started: 0,
            overflows: 0,
            log: Vec::new(),
        }
    }

    fn record(&mut self, event: Event) {
        // a full log drops the newest events, tests keep transfers short
        let _ = self.log.push(event);
    }

    fn tick(&mut self) {
        if self.stalled {
            return;
        }
        if let Some(frame) = self.shifting.as_mut() {
            frame.remaining = frame.remaining.saturating_sub(1);
            if frame.remaining == 0 {
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        let Some(frame) = self.shifting.take() else {
            return;
        };

        let received = if Ctrl::from(self.ctrl).loopbk() {
            frame.byte
        } else {
            self.miso.pop_front().unwrap_or(IDLE_MISO)
        };
        if self.rx.push_back(received).is_err() {
            self.overflows += 1;
        }

        self.status.set_txc(true);
        self.status.set_txbl(true);
        self.status.set_txidle(true);
        self.status.set_rxdatav(true);
    }

    fn start(&mut self, byte: u8) {
        if self.shifting.is_some() {
            self.finish();
        }
        self.frames_started += 1;
        self.status.set_txc(false);
        self.status.set_txbl(false);
        self.status.set_txidle(false);
        self.shifting = Some(Shifting {
            byte,
            remaining: self.latency,
        });
        if self.latency == 0 {
            self.finish();
        }
    }

    fn command(&mut self, cmd: u32) {
        if cmd & CMD_RXEN != 0 {
            self.status.set_rxens(true);
        }
        if cmd & CMD_RXDIS != 0 {
            self.status.set_rxens(false);
        }
        if cmd & CMD_TXEN != 0 {
            self.status.set_txens(true);
        }
        if cmd & CMD_TXDIS != 0 {
            self.status.set_txens(false);
        }
        if cmd & CMD_MASTEREN != 0 {
            self.status.set_master(true);
        }
        if cmd & CMD_MASTERDIS != 0 {
            self.status.set_master(false);
        }
        if cmd & CMD_CLEARTX != 0 {
            self.shifting = None;
            self.status.set_txbl(true);
            self.status.set_txidle(true);
        }
        if cmd & CMD_CLEARRX != 0 {
            self.rx.clear();
            self.status.set_rxdatav(false);
        }
    }

    fn pop_rx(&mut self) -> u8 {
        let byte = self.rx.pop_front().unwrap_or(0);
        self.status.set_rxdatav(!self.rx.is_empty());
        byte
    }
}

pub struct SimUsart {
    state: Mutex<RefCell<State>>,
}

impl Default for SimUsart {
    fn default() -> Self {
        Self::new()
    }
}

impl SimUsart {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State::new())),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// STATUS reads before a written frame completes.
    pub fn set_latency(&self, polls: u32) {
        self.with(|s| s.latency = polls)
    }

    /// Freeze the shift register: TXC never rises while stalled.
    pub fn stall(&self, stalled: bool) {
        self.with(|s| s.stalled = stalled)
    }

    /// Bytes the slave shifts back, one per frame. Bytes past the queue
    /// capacity are dropped.
    pub fn queue_miso(&self, bytes: &[u8]) {
        self.with(|s| {
            for &b in bytes {
                let _ = s.miso.push_back(b);
            }
        })
    }

    /// Register value without read side effects.
    pub fn peek(&self, reg: Reg) -> u32 {
        self.with(|s| match reg {
            Reg::Ctrl => s.ctrl,
            Reg::Frame => s.frame,
            Reg::Cmd => 0,
            Reg::Status => s.status.into(),
            Reg::ClkDiv => s.clkdiv,
            Reg::RxData => s.rx.front().copied().unwrap_or(0) as u32,
            Reg::TxData => 0,
            Reg::RoutePen => s.routepen,
            Reg::RouteLoc0 => s.routeloc0,
            Reg::RouteLoc1 => s.routeloc1,
        })
    }

    pub fn events(&self) -> Vec<Event, LOG_CAPACITY> {
        self.with(|s| s.log.clone())
    }

    pub fn clear_events(&self) {
        self.with(|s| s.log.clear())
    }

    /// Every byte written to TXDATA, in order.
    pub fn tx_bytes(&self) -> Vec<u8, LOG_CAPACITY> {
        self.with(|s| {
            s.log
                .iter()
                .filter_map(|e| match e {
                    Event::Write(Reg::TxData, v) => Some(*v as u8),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn rx_reads(&self) -> usize {
        self.with(|s| s.log.iter().filter(|e| matches!(e, Event::Read(Reg::RxData, _))).count())
    }

    pub fn frames_started(&self) -> u32 {
        self.with(|s| s.frames_started)
    }

    pub fn overflows(&self) -> u32 {
        self.with(|s| s.overflows)
    }
}

impl Registers for SimUsart {
    fn read(&self, reg: Reg) -> u32 {
        self.with(|s| match reg {
            Reg::Status => {
                s.tick();
                s.status.into()
            }
            Reg::RxData => {
                let byte = s.pop_rx() as u32;
                s.record(Event::Read(Reg::RxData, byte));
                byte
            }
            Reg::Ctrl => s.ctrl,
            Reg::Frame => s.frame,
            Reg::ClkDiv => s.clkdiv,
            Reg::RoutePen => s.routepen,
            Reg::RouteLoc0 => s.routeloc0,
            Reg::RouteLoc1 => s.routeloc1,
            Reg::Cmd | Reg::TxData => 0,
        })
    }

    fn write(&self, reg: Reg, value: u32) {
        self.with(|s| {
            s.record(Event::Write(reg, value));
            match reg {
                Reg::TxData => s.start(value as u8),
                Reg::Cmd => s.command(value),
                Reg::Ctrl => s.ctrl = value,
                Reg::Frame => s.frame = value,
                Reg::ClkDiv => s.clkdiv = value & CLKDIV_DIV_MASK,
                Reg::RoutePen => s.routepen = value,
                Reg::RouteLoc0 => s.routeloc0 = value,
                Reg::RouteLoc1 => s.routeloc1 = value,
                Reg::Status | Reg::RxData => {}
            }
        })
    }
}

/// Chip select lines that log into the USART event stream, so their timing
/// can be checked against the frames.
pub struct SimChipSelect<'a> {
    sim: &'a SimUsart,
}

impl<'a> SimChipSelect<'a> {
    pub fn new(sim: &'a SimUsart) -> Self {
        Self { sim }
    }
}

impl ChipSelect for SimChipSelect<'_> {
    fn select(&mut self, index: u8) -> Result<(), Error> {
        self.sim.with(|s| s.record(Event::Select(index)));
        Ok(())
    }

    fn deselect(&mut self, index: u8) -> Result<(), Error> {
        self.sim.with(|s| s.record(Event::Deselect(index)));
        Ok(())
    }
}

#[derive(Default)]
pub struct SimClocks {
    enabled: Vec<ClockId, 4>,
}

impl SimClocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> &[ClockId] {
        &self.enabled
    }
}

impl ClockControl for SimClocks {
    fn enable(&mut self, clock: ClockId) {
        let _ = self.enabled.push(clock);
    }
}

#[derive(Default)]
pub struct SimPins {
    configured: Vec<(Pin, PinMode, Level), 8>,
}

impl SimPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configured(&self) -> &[(Pin, PinMode, Level)] {
        &self.configured
    }
}

impl PinConfigurator for SimPins {
    fn configure(&mut self, pin: Pin, mode: PinMode, level: Level) {
        let _ = self.configured.push((pin, mode, level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_completes_after_latency() {
        let sim = SimUsart::new();
        sim.set_latency(3);
        sim.queue_miso(&[0x42]);

        sim.write(Reg::TxData, 0x01);
        assert!(!Status::from(sim.read(Reg::Status)).txc());
        assert!(!Status::from(sim.read(Reg::Status)).txc());
        let status = Status::from(sim.read(Reg::Status));
        assert!(status.txc());
        assert!(status.txidle());
        assert!(status.rxdatav());

        assert_eq!(sim.read(Reg::RxData), 0x42);
        assert!(!Status::from(sim.peek(Reg::Status)).rxdatav());
    }

    #[test]
    fn receive_buffer_overflows_past_two_frames() {
        let sim = SimUsart::new();
        sim.set_latency(0);
        for b in 0..3 {
            sim.write(Reg::TxData, b);
        }
        assert_eq!(sim.overflows(), 1);
    }

    #[test]
    fn undriven_miso_reads_high() {
        let sim = SimUsart::new();
        sim.set_latency(0);
        sim.write(Reg::TxData, 0x00);
        assert_eq!(sim.read(Reg::RxData), IDLE_MISO as u32);
    }
}
