//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Counting wake signal. The producer releases once per notification stream
//! written to the ring; the dispatcher acquires once per stream it decodes.

use parking_lot::{Condvar, Mutex};


#[derive(Debug, Default)]
struct WakeState {
    count : usize,
    closed : bool
}

#[derive(Debug, Default)]
pub struct WakeSignal {
    state : Mutex<WakeState>,
    condvar : Condvar
}

impl WakeSignal {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        state.count += 1;
        drop(state);
        self.condvar.notify_one();
    }

    /// Block until a release is available and consume it. Returns false once
    /// the signal has been closed.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            if state.count > 0 {
                state.count -= 1;
                return true;
            }
            self.condvar.wait(&mut state);
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.condvar.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.state.lock().count
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn counts_releases() {
        let wake = WakeSignal::new();
        wake.release();
        wake.release();
        assert_eq!(wake.pending(), 2);
        assert!(wake.acquire());
        assert!(wake.acquire());
        assert_eq!(wake.pending(), 0);
    }

    #[test]
    fn close_unblocks_waiter() {
        let wake = Arc::new(WakeSignal::new());
        let waiter = {
            let wake = wake.clone();
            thread::spawn(move || wake.acquire())
        };

        thread::sleep(Duration::from_millis(20));
        wake.close();
        assert!(!waiter.join().unwrap());
    }
}
