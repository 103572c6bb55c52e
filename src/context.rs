//! Transfer context
//!
//! One context per peripheral. Holding its lock is what entitles a caller to
//! touch the data registers; the buffers of the running transaction borrow
//! from that lock and cannot outlive it.

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;

use crate::spi::{Error, RangeError};

/// Buffer pairs per transaction, no scatter-gather.
pub const MAX_BUFFER_PAIRS: usize = 1;

struct State<C> {
    cs: C,
    transactions: u32,
}

pub struct TransferContext<C> {
    state: Mutex<CriticalSectionRawMutex, State<C>>,
    sync: Signal<CriticalSectionRawMutex, Result<(), Error>>,
}

impl<C> TransferContext<C> {
    pub const fn new(cs: C) -> Self {
        Self {
            state: Mutex::new(State { cs, transactions: 0 }),
            sync: Signal::new(),
        }
    }

    /// Wait until no other transaction holds the context.
    pub fn lock(&self) -> ContextGuard<'_, C> {
        ContextGuard {
            state: block_on(self.state.lock()),
            sync: &self.sync,
        }
    }

    /// Take the context, or fail with [`Error::Busy`] if a transaction is in flight.
    pub fn try_lock(&self) -> Result<ContextGuard<'_, C>, Error> {
        match self.state.try_lock() {
            Ok(state) => Ok(ContextGuard { state, sync: &self.sync }),
            Err(_) => Err(Error::Busy),
        }
    }

    pub fn into_inner(self) -> C {
        self.state.into_inner().cs
    }
}

/// Exclusive use of a [`TransferContext`], released on drop.
pub struct ContextGuard<'c, C> {
    state: MutexGuard<'c, CriticalSectionRawMutex, State<C>>,
    sync: &'c Signal<CriticalSectionRawMutex, Result<(), Error>>,
}

impl<'c, C> ContextGuard<'c, C> {
    pub fn chip_select(&mut self) -> &mut C {
        &mut self.state.cs
    }

    /// Number of transactions set up on this context so far.
    pub fn transactions(&self) -> u32 {
        self.state.transactions
    }

    /// Record the buffers of the next transaction.
    ///
    /// `count` is the number of buffer pairs the caller intends to use and
    /// each set may hold at most that many buffers. An absent buffer counts as
    /// zero length. The receive buffer is moved out of `rx_bufs`, so the
    /// transfer borrows only the buffers and not the sets. The guard moves
    /// into the returned [`Transfer`], so a second setup is impossible until
    /// the first transfer is completed.
    pub fn setup<'b>(
        mut self,
        tx_bufs: &[&'b [u8]],
        rx_bufs: &mut [&'b mut [u8]],
        count: usize,
    ) -> Result<Transfer<'c, 'b, C>, Error> {
        if count != MAX_BUFFER_PAIRS {
            error!("Only {=usize} buffer pair per transaction", MAX_BUFFER_PAIRS);
            return Err(Error::Range(RangeError::BufferCount(count)));
        }
        if tx_bufs.len() > count {
            error!("Too many tx buffers: {=usize}", tx_bufs.len());
            return Err(Error::Range(RangeError::BufferCount(tx_bufs.len())));
        }
        if rx_bufs.len() > count {
            error!("Too many rx buffers: {=usize}", rx_bufs.len());
            return Err(Error::Range(RangeError::BufferCount(rx_bufs.len())));
        }

        let tx: &'b [u8] = tx_bufs.first().copied().unwrap_or(&[]);
        let rx: &'b mut [u8] = rx_bufs.first_mut().map(core::mem::take).unwrap_or_default();

        self.sync.reset();
        self.state.transactions = self.state.transactions.wrapping_add(1);

        Ok(Transfer { guard: self, tx, rx })
    }
}

/// Buffers of the transaction currently owning the context.
pub struct Transfer<'c, 'b, C> {
    guard: ContextGuard<'c, C>,
    tx: &'b [u8],
    rx: &'b mut [u8],
}

impl<'c, 'b, C> Transfer<'c, 'b, C> {
    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }

    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Frames to clock: the longer of the two buffers.
    pub fn longest_len(&self) -> usize {
        self.tx.len().max(self.rx.len())
    }

    pub fn chip_select(&mut self) -> &mut C {
        self.guard.chip_select()
    }

    pub(crate) fn buffers(&mut self) -> (&[u8], &mut [u8]) {
        (self.tx, &mut *self.rx)
    }

    /// Finish the transaction with `status` and wake whoever waits on it.
    pub fn complete(self, status: Result<(), Error>) -> Completion<'c, C> {
        self.guard.sync.signal(status);
        Completion { guard: self.guard }
    }
}

/// A completed transaction that still holds the context.
pub struct Completion<'c, C> {
    guard: ContextGuard<'c, C>,
}

impl<'c, C> Completion<'c, C> {
    /// Collect the completion status and release the context.
    pub fn wait(self) -> Result<(), Error> {
        block_on(self.guard.sync.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_buffer_sets_the_frame_count() {
        let ctx = TransferContext::new(());
        let tx = [1u8, 2, 3, 4, 5];
        let mut rx = [0u8; 3];

        let xfer = ctx.lock().setup(&[&tx], &mut [&mut rx], 1).unwrap();
        assert_eq!(xfer.tx_len(), 5);
        assert_eq!(xfer.rx_len(), 3);
        assert_eq!(xfer.longest_len(), 5);
    }

    #[test]
    fn transfer_outlives_a_temporary_buffer_set() {
        let ctx = TransferContext::new(());
        let mut rx = [0u8; 2];

        let mut xfer = ctx.lock().setup(&[&[7, 8]], &mut [&mut rx], 1).unwrap();
        let (tx, rx_buf) = xfer.buffers();
        rx_buf.copy_from_slice(tx);
        xfer.complete(Ok(())).wait().unwrap();

        assert_eq!(rx, [7, 8]);
    }

    #[test]
    fn missing_sets_are_zero_length() {
        let ctx = TransferContext::new(());
        let mut rx = [0u8; 4];

        let xfer = ctx.lock().setup(&[], &mut [&mut rx], 1).unwrap();
        assert_eq!(xfer.tx_len(), 0);
        assert_eq!(xfer.longest_len(), 4);
        drop(xfer);

        let xfer = ctx.lock().setup(&[], &mut [], 1).unwrap();
        assert_eq!(xfer.longest_len(), 0);
    }

    #[test]
    fn scatter_gather_is_refused() {
        let ctx = TransferContext::new(());
        let a = [0u8; 2];
        let b = [0u8; 2];

        assert_eq!(
            ctx.lock().setup(&[&a, &b], &mut [], 1).err(),
            Some(Error::Range(RangeError::BufferCount(2)))
        );
        assert_eq!(
            ctx.lock().setup(&[&a], &mut [], 2).err(),
            Some(Error::Range(RangeError::BufferCount(2)))
        );

        // a refused setup leaves the context free
        assert!(ctx.try_lock().is_ok());
    }

    #[test]
    fn held_context_reports_busy() {
        let ctx = TransferContext::new(());
        let guard = ctx.lock();
        assert_eq!(ctx.try_lock().err(), Some(Error::Busy));
        drop(guard);
        assert!(ctx.try_lock().is_ok());
    }

    #[test]
    fn completion_carries_status_and_releases() {
        let ctx = TransferContext::new(());

        let xfer = ctx.lock().setup(&[&[0xAA]], &mut [], 1).unwrap();
        let done = xfer.complete(Err(Error::Timeout));
        assert_eq!(ctx.try_lock().err(), Some(Error::Busy));
        assert_eq!(done.wait(), Err(Error::Timeout));

        // status from the previous transaction does not leak forward
        let xfer = ctx.lock().setup(&[&[0xAA]], &mut [], 1).unwrap();
        assert_eq!(xfer.complete(Ok(())).wait(), Ok(()));

        assert_eq!(ctx.lock().transactions(), 2);
    }
}
