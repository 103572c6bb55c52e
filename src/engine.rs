//! Polled transceive loop
//!
//! Synchronous mode shifts one byte in for every byte shifted out, so every
//! frame written is followed by exactly one read of RXDATA, wanted or not.

use crate::context::{Completion, Transfer};
use crate::cs::ChipSelect;
use crate::regs::{Reg, Registers, Status, CMD_CLEARRX, CMD_CLEARTX};
use crate::spi::Error;

/// Sent when the caller has nothing (left) to transmit.
pub const DUMMY_FRAME: u8 = 0x00;

/// Run a set-up transfer to the end and complete it.
pub fn run<'c, R, C>(regs: &R, mut xfer: Transfer<'c, '_, C>, slave: u8, poll_limit: u32) -> Completion<'c, C>
where
    R: Registers,
    C: ChipSelect,
{
    trace!(
        "xfer: tx={=usize} rx={=usize} frames={=usize}",
        xfer.tx_len(),
        xfer.rx_len(),
        xfer.longest_len()
    );

    flush_rx(regs);

    let selected = xfer.chip_select().select(slave);
    let status = match selected {
        Ok(()) => {
            let (tx, rx) = xfer.buffers();
            let shifted = shift(regs, tx, rx, poll_limit);
            let released = xfer.chip_select().deselect(slave);
            shifted.and(released)
        }
        Err(e) => Err(e),
    };

    xfer.complete(status)
}

/// Clock `max(tx.len(), rx.len())` frames.
///
/// `tx` is padded with [`DUMMY_FRAME`]; bytes received past the end of `rx`
/// are read and dropped.
pub fn shift<R: Registers>(regs: &R, tx: &[u8], rx: &mut [u8], poll_limit: u32) -> Result<(), Error> {
    let len = tx.len().max(rx.len());
    for i in 0..len {
        let byte = tx.get(i).copied().unwrap_or(DUMMY_FRAME);
        let received = transfer_frame(regs, byte, poll_limit)?;
        if let Some(slot) = rx.get_mut(i) {
            *slot = received;
        }
    }
    Ok(())
}

/// Full-duplex transfer where the received bytes replace the sent ones.
pub fn shift_in_place<R: Registers>(regs: &R, words: &mut [u8], poll_limit: u32) -> Result<(), Error> {
    for word in words.iter_mut() {
        *word = transfer_frame(regs, *word, poll_limit)?;
    }
    Ok(())
}

pub fn transfer_frame<R: Registers>(regs: &R, byte: u8, poll_limit: u32) -> Result<u8, Error> {
    regs.write(Reg::TxData, byte as u32);

    if let Err(e) = wait_for(regs, poll_limit, |s| s.txc()) {
        warn!("TXC not set after {=u32} polls, aborting frame", poll_limit);
        regs.write(Reg::Cmd, CMD_CLEARTX);
        return Err(e);
    }

    Ok(regs.read(Reg::RxData) as u8)
}

/// Drop whatever a previous user left in the receive buffer.
pub fn flush_rx<R: Registers>(regs: &R) {
    regs.write(Reg::Cmd, CMD_CLEARRX);
}

/// Poll STATUS until `ready` holds, at most `poll_limit` reads.
pub fn wait_for<R: Registers>(regs: &R, poll_limit: u32, ready: impl Fn(Status) -> bool) -> Result<Status, Error> {
    for _ in 0..poll_limit {
        let status = Status::from(regs.read(Reg::Status));
        if ready(status) {
            return Ok(status);
        }
        core::hint::spin_loop();
    }
    Err(Error::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TransferContext;
    use crate::regs::Ctrl;
    use crate::sim::{Event, SimChipSelect, SimUsart};

    const LIMIT: u32 = 1_000;

    fn loopback(sim: &SimUsart, on: bool) {
        sim.modify(Reg::Ctrl, |v| {
            let mut ctrl = Ctrl::from(v);
            ctrl.set_loopbk(on);
            ctrl.into()
        });
    }

    #[test]
    fn short_rx_buffer_is_never_written_past_its_end() {
        let sim = SimUsart::new();
        sim.queue_miso(&[0x10, 0x20, 0x30, 0x40, 0x50]);

        let tx = [1, 2, 3, 4, 5];
        let mut rx = [0xEEu8; 5];
        {
            let (head, _) = rx.split_at_mut(3);
            shift(&sim, &tx, head, LIMIT).unwrap();
        }

        assert_eq!(sim.tx_bytes().as_slice(), &tx);
        assert_eq!(sim.rx_reads(), 5);
        assert_eq!(rx, [0x10, 0x20, 0x30, 0xEE, 0xEE]);
    }

    #[test]
    fn pure_receive_clocks_dummy_frames() {
        let sim = SimUsart::new();
        sim.queue_miso(&[0xA0, 0xA1, 0xA2, 0xA3]);

        let mut rx = [0u8; 4];
        shift(&sim, &[], &mut rx, LIMIT).unwrap();

        assert_eq!(sim.tx_bytes().as_slice(), &[DUMMY_FRAME; 4]);
        assert_eq!(rx, [0xA0, 0xA1, 0xA2, 0xA3]);
    }

    #[test]
    fn loopback_echoes_in_order() {
        let sim = SimUsart::new();
        loopback(&sim, true);

        let mut rx = [0u8; 3];
        shift(&sim, &[0x11, 0x22, 0x33], &mut rx, LIMIT).unwrap();
        assert_eq!(rx, [0x11, 0x22, 0x33]);
    }

    #[test]
    fn in_place_replaces_each_byte() {
        let sim = SimUsart::new();
        sim.queue_miso(&[0x0F, 0x0E]);

        let mut words = [0xF0, 0xE0];
        shift_in_place(&sim, &mut words, LIMIT).unwrap();
        assert_eq!(sim.tx_bytes().as_slice(), &[0xF0, 0xE0]);
        assert_eq!(words, [0x0F, 0x0E]);
    }

    #[test]
    fn slow_hardware_is_waited_for() {
        let sim = SimUsart::new();
        sim.set_latency(50);
        loopback(&sim, true);

        assert_eq!(transfer_frame(&sim, 0x5A, 51), Ok(0x5A));
    }

    #[test]
    fn stalled_transmitter_times_out() {
        let sim = SimUsart::new();
        sim.stall(true);

        assert_eq!(transfer_frame(&sim, 0x5A, 10), Err(Error::Timeout));
        assert_eq!(sim.rx_reads(), 0);
        assert!(sim.events().contains(&Event::Write(Reg::Cmd, CMD_CLEARTX)));
    }

    #[test]
    fn chip_select_brackets_the_frames() {
        let sim = SimUsart::new();
        let ctx = TransferContext::new(SimChipSelect::new(&sim));
        sim.queue_miso(&[0x99]);

        let mut rx = [0u8; 1];
        let xfer = ctx.lock().setup(&[&[0x42]], &mut [&mut rx], 1).unwrap();
        run(&sim, xfer, 2, LIMIT).wait().unwrap();

        let events = sim.events();
        let frames: heapless::Vec<Event, 8> = events
            .iter()
            .copied()
            .filter(|e| {
                matches!(
                    e,
                    Event::Select(_) | Event::Deselect(_) | Event::Write(Reg::TxData, _) | Event::Read(Reg::RxData, _)
                )
            })
            .collect();

        assert_eq!(
            frames.as_slice(),
            &[
                Event::Select(2),
                Event::Write(Reg::TxData, 0x42),
                Event::Read(Reg::RxData, 0x99),
                Event::Deselect(2),
            ]
        );
        assert_eq!(rx, [0x99]);
    }

    #[test]
    fn stale_receive_data_is_flushed_first() {
        let sim = SimUsart::new();
        loopback(&sim, true);
        // leave an unread byte behind
        sim.write(Reg::TxData, 0x77);
        let _ = Status::from(sim.read(Reg::Status));

        let ctx = TransferContext::new(SimChipSelect::new(&sim));
        let mut rx = [0u8; 1];
        let xfer = ctx.lock().setup(&[&[0x01]], &mut [&mut rx], 1).unwrap();
        run(&sim, xfer, 0, LIMIT).wait().unwrap();

        assert_eq!(rx, [0x01]);
    }

    #[test]
    fn timeout_still_releases_chip_select() {
        let sim = SimUsart::new();
        sim.stall(true);
        let ctx = TransferContext::new(SimChipSelect::new(&sim));

        let xfer = ctx.lock().setup(&[&[1, 2, 3]], &mut [], 1).unwrap();
        assert_eq!(run(&sim, xfer, 1, 5).wait(), Err(Error::Timeout));

        let events = sim.events();
        assert_eq!(events.last(), Some(&Event::Deselect(1)));
        assert_eq!(sim.tx_bytes().len(), 1);
    }
}
