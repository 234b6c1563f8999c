//! Radio manager implementation
//!
//! `RadioManager` is the shared front: threads submit tasks and await
//! completion signals. `radio_worker` is the single task that owns the
//! transceiver and executes the queue in priority order.

use super::{Frequency, RadioError, RadioTask, TxPriority};
use crate::communication::hdlc::{self, BitBuf, FSK_SYNC_BYTE, HDLC_FLAG};
use crate::communication::packet::PacketPool;
use crate::core::datapoint::TelemetryPoint;
use crate::devices::transceiver::{Modulation, Transceiver};
use crate::subsystems::band::clamp_to_plan;
use crate::subsystems::geofence::resolve_regional;
use crate::devices::transceiver::RxFrame;
use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Timer};
use heapless::binary_heap::{BinaryHeap, Min};

/// Pending task slots. Submissions beyond this fail with `QueueFull`.
pub const QUEUE_DEPTH: usize = 16;

/// Buffered received frames awaiting decode.
pub const RX_QUEUE_DEPTH: usize = 8;

/// CCA attempts before a task fails with `ChannelBusy`.
pub const CCA_MAX_RETRIES: u32 = 5;

/// Default completion wait.
pub const TX_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a transceiver fault before serving the next task.
const HW_COOLDOWN: Duration = Duration::from_secs(2);

/// Key-up tail before returning to receive.
const TX_TAIL: Duration = Duration::from_millis(10);

// Slot lifecycle
const SLOT_FREE: u8 = 0;
const SLOT_QUEUED: u8 = 1;
const SLOT_ACTIVE: u8 = 2;
const SLOT_CANCELLED: u8 = 3;
/// Waiter gave up; the worker recycles the slot when done.
const SLOT_ABANDONED: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: TxPriority,
    seq: u32,
    slot: u8,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

/// Ticket for one queued transmission.
#[derive(Debug, Clone, Copy)]
pub struct TxTicket {
    slot: u8,
}

type SlotMutex<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

pub struct RadioManager {
    queue: SlotMutex<BinaryHeap<QueueEntry, Min, QUEUE_DEPTH>>,
    tasks: [SlotMutex<Option<RadioTask>>; QUEUE_DEPTH],
    completions: [Signal<CriticalSectionRawMutex, Result<(), RadioError>>; QUEUE_DEPTH],
    states: [AtomicU8; QUEUE_DEPTH],
    seq: AtomicU32,
    wake: Signal<CriticalSectionRawMutex, ()>,
    /// Frequency to listen on between transmissions
    rx_frequency: AtomicU32,
    /// Demodulated frames from the driver, consumed by the receiver thread
    rx_frames: Channel<CriticalSectionRawMutex, RxFrame, RX_QUEUE_DEPTH>,
    pool: &'static PacketPool,
}

impl RadioManager {
    pub const fn new(pool: &'static PacketPool) -> Self {
        Self {
            queue: Mutex::new(RefCell::new(BinaryHeap::new())),
            tasks: [const { Mutex::new(RefCell::new(None)) }; QUEUE_DEPTH],
            completions: [const { Signal::new() }; QUEUE_DEPTH],
            states: [const { AtomicU8::new(SLOT_FREE) }; QUEUE_DEPTH],
            seq: AtomicU32::new(0),
            wake: Signal::new(),
            rx_frequency: AtomicU32::new(0),
            rx_frames: Channel::new(),
            pool,
        }
    }

    /// Driver glue pushes demodulated frames here. Frames arriving while
    /// the queue is full are dropped (half-duplex loss is expected).
    pub fn deliver_rx(&self, frame: RxFrame) {
        if self.rx_frames.try_send(frame).is_err() {
            crate::log_warn!("radio: rx queue full, frame dropped");
        }
    }

    /// Wait for the next received frame.
    pub async fn next_rx(&self) -> RxFrame {
        self.rx_frames.receive().await
    }

    pub fn pool(&self) -> &'static PacketPool {
        self.pool
    }

    /// Set the frequency the worker returns to after each transmission.
    pub fn set_rx_frequency(&self, hz: u32) {
        self.rx_frequency.store(hz, Ordering::Release);
    }

    /// Enqueue a task. The caller's packet reference transfers to the
    /// manager, which releases it after completion or failure.
    pub fn submit(&self, task: RadioTask) -> Result<TxTicket, RadioError> {
        let slot = self
            .states
            .iter()
            .position(|s| {
                s.compare_exchange(SLOT_FREE, SLOT_QUEUED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .ok_or(RadioError::QueueFull)?;
        self.completions[slot].reset();
        self.tasks[slot].lock(|t| *t.borrow_mut() = Some(task));
        let entry = QueueEntry {
            priority: task.priority,
            seq: self.seq.fetch_add(1, Ordering::AcqRel),
            slot: slot as u8,
        };
        let pushed = self.queue.lock(|q| q.borrow_mut().push(entry).is_ok());
        if !pushed {
            self.tasks[slot].lock(|t| *t.borrow_mut() = None);
            self.states[slot].store(SLOT_FREE, Ordering::Release);
            return Err(RadioError::QueueFull);
        }
        self.wake.signal(());
        Ok(TxTicket { slot: slot as u8 })
    }

    /// Cancel a task that has not started yet. Returns false once the
    /// worker has picked it up; a running transmission is never aborted.
    /// Follow up with [`wait`](Self::wait) to reap the slot.
    pub fn cancel(&self, ticket: TxTicket) -> bool {
        self.states[ticket.slot as usize]
            .compare_exchange(
                SLOT_QUEUED,
                SLOT_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Wait for a submitted task to finish.
    pub async fn wait(&self, ticket: TxTicket) -> Result<(), RadioError> {
        let slot = ticket.slot as usize;
        match with_timeout(TX_TIMEOUT, self.completions[slot].wait()).await {
            Ok(result) => {
                self.states[slot].store(SLOT_FREE, Ordering::Release);
                result
            }
            Err(_) => {
                // still queued: cancel outright; active: let the worker
                // recycle the slot when the transmission finishes
                if self.states[slot]
                    .compare_exchange(
                        SLOT_QUEUED,
                        SLOT_CANCELLED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    let _ = self.states[slot].compare_exchange(
                        SLOT_ACTIVE,
                        SLOT_ABANDONED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                Err(RadioError::Timeout)
            }
        }
    }

    /// Submit and wait.
    pub async fn transmit(&self, task: RadioTask) -> Result<(), RadioError> {
        let ticket = self.submit(task)?;
        self.wait(ticket).await
    }

    fn pop(&self) -> Option<QueueEntry> {
        self.queue.lock(|q| q.borrow_mut().pop())
    }

    fn take_task(&self, slot: usize) -> Option<RadioTask> {
        self.tasks[slot].lock(|t| t.borrow_mut().take())
    }

    fn finish_slot(&self, slot: usize, result: Result<(), RadioError>) {
        self.completions[slot].signal(result);
        // A waiter that already gave up cannot recycle the slot; do it here.
        if self.states[slot]
            .compare_exchange(
                SLOT_ABANDONED,
                SLOT_FREE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.completions[slot].reset();
        }
    }
}

/// xorshift32; good enough to spread CCA retries.
pub(crate) struct XorShift32(u32);

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

/// Randomised exponential backoff for one busy-channel retry, in the
/// 50..=500 ms window.
pub(crate) fn cca_backoff_ms(attempt: u32, rng: &mut XorShift32) -> u32 {
    let ceiling = (50u32 << attempt).min(500);
    let span = ceiling - 50 + 1;
    50 + rng.next() % span
}

/// Assemble the on-air bitstream for one frame.
///
/// AFSK 1200: flag preamble, stuffed frame, closing flag, NRZI over the
/// whole stream. 2FSK 9600: 0x33 sync preamble, flags, stuffed frame,
/// scrambled with the G3RUH polynomial.
pub fn build_airstream(
    frame: &[u8],
    modulation: Modulation,
    preamble: u16,
) -> Result<BitBuf, RadioError> {
    let mut bits = BitBuf::new();
    let mut push = |b: u8| -> Result<(), RadioError> {
        bits.push_byte(b).map_err(|_| RadioError::Encode)
    };
    match modulation {
        Modulation::Afsk1200 => {
            for _ in 0..preamble.max(1) {
                push(HDLC_FLAG)?;
            }
        }
        Modulation::Fsk9600 => {
            for _ in 0..preamble.max(1) {
                push(FSK_SYNC_BYTE)?;
            }
            push(HDLC_FLAG)?;
        }
    }
    hdlc::stuff(frame, &mut bits).map_err(|_| RadioError::Encode)?;
    bits.push_byte(HDLC_FLAG).map_err(|_| RadioError::Encode)?;
    match modulation {
        Modulation::Afsk1200 => hdlc::nrzi_encode(&bits).map_err(|_| RadioError::Encode),
        Modulation::Fsk9600 => hdlc::scramble(&bits).map_err(|_| RadioError::Encode),
    }
}

async fn run_tx<T: Transceiver>(
    chip: &mut T,
    manager: &RadioManager,
    task: &RadioTask,
    position: &impl Fn() -> Option<TelemetryPoint>,
    rng: &mut XorShift32,
) -> Result<(), RadioError> {
    let hz = match task.frequency {
        Frequency::Static(h) => clamp_to_plan(h),
        Frequency::AprsRegional => resolve_regional(position().as_ref()),
    };

    chip.set_frequency(hz)
        .await
        .map_err(|_| RadioError::Hardware)?;
    chip.set_power(task.power)
        .await
        .map_err(|_| RadioError::Hardware)?;
    chip.set_modulation(task.modulation)
        .await
        .map_err(|_| RadioError::Hardware)?;

    if task.cca_rssi > 0 {
        let mut clear = false;
        for attempt in 0..CCA_MAX_RETRIES {
            let rssi = chip.read_rssi().await.map_err(|_| RadioError::Hardware)?;
            if rssi < task.cca_rssi {
                clear = true;
                break;
            }
            if attempt + 1 < CCA_MAX_RETRIES {
                let ms = cca_backoff_ms(attempt, rng);
                Timer::after(Duration::from_millis(ms as u64)).await;
            }
        }
        if !clear {
            return Err(RadioError::ChannelBusy);
        }
    }

    let frame = manager
        .pool
        .with(task.packet, |f| f.encode())
        .map_err(|_| RadioError::Encode)?;
    let bits = build_airstream(&frame, task.modulation, task.preamble)?;
    chip.transmit(&bits).await.map_err(|_| RadioError::Hardware)?;

    Timer::after(TX_TAIL).await;
    let rx_hz = manager.rx_frequency.load(Ordering::Acquire);
    if rx_hz != 0 {
        let _ = chip.start_rx(rx_hz).await;
    }
    Ok(())
}

/// The worker task owning the transceiver. `position` supplies the last
/// published telemetry point for dynamic frequency resolution.
pub async fn radio_worker<T: Transceiver>(
    manager: &RadioManager,
    mut chip: T,
    position: impl Fn() -> Option<TelemetryPoint>,
) -> ! {
    let mut rng = XorShift32::new(embassy_time::Instant::now().as_ticks() as u32 | 1);
    loop {
        let entry = loop {
            match manager.pop() {
                Some(e) => break e,
                None => manager.wake.wait().await,
            }
        };
        let slot = entry.slot as usize;

        // PREP gate: once active, the task runs to completion
        if manager.states[slot]
            .compare_exchange(
                SLOT_QUEUED,
                SLOT_ACTIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // cancelled while queued; the canceller's wait() reaps the slot
            if let Some(task) = manager.take_task(slot) {
                manager.pool.release(task.packet);
            }
            manager.completions[slot].signal(Err(RadioError::Cancelled));
            continue;
        }

        let Some(task) = manager.take_task(slot) else {
            manager.states[slot].store(SLOT_FREE, Ordering::Release);
            continue;
        };

        let result = run_tx(&mut chip, manager, &task, &position, &mut rng).await;
        manager.pool.release(task.packet);
        let hw_fault = result == Err(RadioError::Hardware);
        manager.finish_slot(slot, result);

        if hw_fault {
            crate::log_error!("radio: hardware fault, resetting driver");
            let _ = chip.reset().await;
            Timer::after(HW_COOLDOWN).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::ax25::Callsign;
    use crate::devices::transceiver::MockTransceiver;
    use core::future::Future;
    use core::pin::pin;
    use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn leak_pool() -> &'static PacketPool {
        Box::leak(Box::new(PacketPool::new()))
    }

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        fn noop(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) }
    }

    /// Drive `main_fut` to completion while polling the endless worker.
    fn run_with_worker<W: Future, F: Future>(worker: W, main_fut: F) -> F::Output {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut worker = pin!(worker);
        let mut main_fut = pin!(main_fut);
        loop {
            if let Poll::Ready(out) = main_fut.as_mut().poll(&mut cx) {
                return out;
            }
            let _ = worker.as_mut().poll(&mut cx);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn make_task(pool: &'static PacketPool, priority: TxPriority, cca: u8) -> RadioTask {
        let packet = pool.alloc().expect("pool slot");
        pool.with(packet, |f| {
            f.src = Callsign::parse("DL7AD-12").unwrap();
            f.dest = Callsign::parse("APECAN").unwrap();
            f.set_info(b">radio manager test").unwrap();
        });
        RadioTask {
            packet,
            frequency: Frequency::Static(144_800_000),
            power: 0x7F,
            modulation: Modulation::Afsk1200,
            cca_rssi: cca,
            preamble: 8,
            priority,
        }
    }

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut heap: BinaryHeap<QueueEntry, Min, QUEUE_DEPTH> = BinaryHeap::new();
        let entries = [
            (TxPriority::Image, 0u32),
            (TxPriority::Beacon, 1),
            (TxPriority::IncomingAck, 2),
            (TxPriority::Beacon, 3),
            (TxPriority::Digipeat, 4),
        ];
        for (i, (priority, seq)) in entries.iter().enumerate() {
            heap.push(QueueEntry {
                priority: *priority,
                seq: *seq,
                slot: i as u8,
            })
            .unwrap();
        }
        let order: Vec<TxPriority> = core::iter::from_fn(|| heap.pop().map(|e| e.priority)).collect();
        assert_eq!(
            order,
            [
                TxPriority::IncomingAck,
                TxPriority::Digipeat,
                TxPriority::Beacon,
                TxPriority::Beacon,
                TxPriority::Image,
            ]
        );
    }

    #[test]
    fn backoff_stays_inside_window_and_grows() {
        let mut rng = XorShift32::new(0xDEAD_BEEF);
        for attempt in 0..CCA_MAX_RETRIES {
            for _ in 0..100 {
                let ms = cca_backoff_ms(attempt, &mut rng);
                assert!((50..=500).contains(&ms), "attempt {attempt}: {ms}");
                assert!(ms <= (50 << attempt).min(500));
            }
        }
    }

    #[test]
    fn busy_channel_fails_after_retries_and_frees_packet() {
        // -70 dBm measured (raw 120) against a -90 dBm threshold (raw 80)
        let pool = leak_pool();
        let chip = MockTransceiver::with_rssi(&[120]);
        let manager = RadioManager::new(pool);
        let task = make_task(pool, TxPriority::Beacon, 80);
        let result = run_with_worker(
            radio_worker(&manager, chip, || None),
            manager.transmit(task),
        );
        assert_eq!(result, Err(RadioError::ChannelBusy));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn clear_channel_transmits_after_backoff() {
        let pool = leak_pool();
        let chip = MockTransceiver::with_rssi(&[120, 120, 10]);
        let manager = RadioManager::new(pool);
        manager.set_rx_frequency(144_800_000);
        let task = make_task(pool, TxPriority::Beacon, 80);
        let result = run_with_worker(
            radio_worker(&manager, chip, || None),
            manager.transmit(task),
        );
        assert_eq!(result, Ok(()));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn dynamic_frequency_resolves_via_geofence() {
        let mut point = TelemetryPoint::empty();
        point.gps_state = crate::core::datapoint::GpsState::LockedOff;
        point.gps_lat = 377_749_000;
        point.gps_lon = -1_224_194_000;
        let pool = leak_pool();
        let chip = MockTransceiver::quiet();
        let manager = RadioManager::new(pool);
        let mut task = make_task(pool, TxPriority::Beacon, 0);
        task.frequency = Frequency::AprsRegional;
        let result = run_with_worker(
            radio_worker(&manager, chip, move || Some(point)),
            manager.transmit(task),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn hardware_fault_surfaces_and_resets() {
        let pool = leak_pool();
        let mut chip = MockTransceiver::quiet();
        chip.tx_failures = 1;
        let manager = RadioManager::new(pool);
        let task = make_task(pool, TxPriority::Beacon, 0);
        let result = run_with_worker(
            radio_worker(&manager, chip, || None),
            manager.transmit(task),
        );
        assert_eq!(result, Err(RadioError::Hardware));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn cancel_before_prep_releases_packet() {
        let pool = leak_pool();
        let manager = RadioManager::new(pool);
        let task = make_task(pool, TxPriority::Beacon, 0);
        let ticket = manager.submit(task).unwrap();
        assert!(manager.cancel(ticket));
        // worker drains the cancelled entry
        let chip = MockTransceiver::quiet();
        let result = run_with_worker(
            radio_worker(&manager, chip, || None),
            manager.wait(ticket),
        );
        assert_eq!(result, Err(RadioError::Cancelled));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn airstream_afsk_is_nrzi_of_stuffed_frame() {
        let frame = [0x7E, 0xFF, 0x00];
        let bits = build_airstream(&frame, Modulation::Afsk1200, 4).unwrap();
        // decoding must invert: NRZI decode, skip preamble flags, destuff
        let decoded = hdlc::nrzi_decode(&bits).unwrap();
        let recovered: heapless::Vec<u8, 64> =
            hdlc::destuff(decoded.iter_bits().skip(4 * 8));
        assert_eq!(&recovered[..frame.len()], &frame[..]);
    }

    #[test]
    fn airstream_fsk_descrambles_back() {
        let frame = [0x12, 0x34, 0x56];
        let bits = build_airstream(&frame, Modulation::Fsk9600, 8).unwrap();
        let descrambled = hdlc::descramble(&bits).unwrap();
        // skip sync preamble and the opening flag
        let recovered: heapless::Vec<u8, 64> =
            hdlc::destuff(descrambled.iter_bits().skip(9 * 8));
        assert_eq!(&recovered[..frame.len()], &frame[..]);
    }
}
