use std::{
    collections::BTreeMap,
    future::Future,
    pin::{Pin, pin},
    sync::{Condvar, LazyLock, Mutex, MutexGuard},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use futures::future::{Either, select};
use parse_display::Display;


static TIMER: LazyLock<Timer> = LazyLock::new(|| Timer {
    queue: Mutex::new(TimerQueue {
        wakers: BTreeMap::new(),
        next_seq: 0,
        worker_running: false,
    }),
    condvar: Condvar::new(),
});

struct Timer {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}

/// Deadline of one sleeping future. `seq` tells apart sleeps with the same instant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    instant: Instant,
    seq: u64,
}

struct TimerQueue {
    wakers: BTreeMap<Key, Waker>,
    next_seq: u64,
    worker_running: bool,
}

impl Timer {
    fn lock(&self) -> MutexGuard<'_, TimerQueue> {
        self.queue.lock().unwrap()
    }

    fn run_worker(&self) {
        let mut due = Vec::new();
        let mut queue = self.lock();
        loop {
            let now = Instant::now();
            while let Some(entry) = queue.wakers.first_entry()
                && entry.key().instant <= now
            {
                due.push(entry.remove());
            }
            if !due.is_empty() {
                drop(queue);
                for waker in due.drain(..) {
                    waker.wake();
                }
                queue = self.lock();
                continue;
            }
            queue = match queue.wakers.first_key_value() {
                Some((key, _)) => {
                    let timeout = key.instant.saturating_duration_since(now);
                    self.condvar.wait_timeout(queue, timeout).unwrap().0
                }
                None => self.condvar.wait(queue).unwrap(),
            };
        }
    }

    fn register(&self, key: Option<Key>, instant: Instant, waker: &Waker) -> Key {
        let mut queue = self.lock();
        if !queue.worker_running {
            queue.worker_running = true;
            std::thread::spawn(|| TIMER.run_worker());
        }
        if let Some(key) = key
            && let Some(w) = queue.wakers.get_mut(&key)
        {
            if !w.will_wake(waker) {
                *w = waker.clone();
            }
            return key;
        }
        let key = Key {
            instant,
            seq: queue.next_seq,
        };
        queue.next_seq = queue.next_seq.wrapping_add(1);
        let is_first = queue.wakers.first_key_value().is_none_or(|(k, _)| key < *k);
        queue.wakers.insert(key, waker.clone());
        if is_first {
            self.condvar.notify_one();
        }
        key
    }

    fn unregister(&self, key: Key) {
        self.lock().wakers.remove(&key);
    }
}

/// Future returned by [`sleep`] and [`sleep_until`].
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    instant: Instant,
    key: Option<Key>,
}

impl Future for Sleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if Instant::now() >= this.instant {
            if let Some(key) = this.key.take() {
                TIMER.unregister(key);
            }
            return Poll::Ready(());
        }
        this.key = Some(TIMER.register(this.key, this.instant, cx.waker()));
        Poll::Pending
    }
}
impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            TIMER.unregister(key);
        }
    }
}

/// Waits for `duration` without blocking the thread. Works on any executor.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

pub fn sleep_until(instant: Instant) -> Sleep {
    Sleep { instant, key: None }
}

#[derive(Debug, Display, PartialEq, Eq)]
#[display("timeout")]
pub struct TimeoutError {
    _private: (),
}
impl TimeoutError {
    fn new() -> Self {
        Self { _private: () }
    }
}

impl std::error::Error for TimeoutError {}

/// Runs `fut` and gives up once `duration` has elapsed.
pub async fn with_timeout_async<T>(
    fut: impl Future<Output = T>,
    duration: Duration,
) -> Result<T, TimeoutError> {
    let fut = pin!(fut);
    match select(fut, sleep(duration)).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right(((), _)) => Err(TimeoutError::new()),
    }
}
