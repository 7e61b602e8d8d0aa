use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<usize> = Cell::new(0);
}

#[inline]
pub fn set_worker_id(id: usize) {
    WORKER_ID.with(|r| r.set(id));
}

#[inline]
pub fn worker_id() -> usize {
    WORKER_ID.with(|r| r.get())
}

#[macro_export]
macro_rules! worker_debug {
    ($t: tt, $($arg:tt)*) => (
        log::debug!(std::concat!("worker-{}: ", $t), crate::worker_log::worker_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! worker_info {
    ($t: tt, $($arg:tt)*) => (
        log::info!(std::concat!("worker-{}: ", $t), crate::worker_log::worker_id(), $($arg)*)
    )
}

#[macro_export]
macro_rules! worker_warn {
    ($t: tt, $($arg:tt)*) => (
        log::warn!(std::concat!("worker-{}: ", $t), crate::worker_log::worker_id(), $($arg)*)
    )
}
