//! Fixed-size worker pool with a FIFO task queue and a `wait()` barrier.
//!
//! Ports `utils::threadpool`. The original exposes `submit()` returning a
//! `std::future`; this port keeps the same worker/queue/`wait()` shape but
//! drops the future plumbing (no async runtime is in the dependency
//! stack) in favor of a channel-backed `submit` for callers that need a
//! result back, and a fire-and-forget `execute` for callers (the scanner,
//! the BFS level filter) that only need the side effect and the barrier.

use std::{
    panic::{
        catch_unwind,
        AssertUnwindSafe,
    },
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        mpsc,
        Arc,
        Condvar,
        Mutex,
    },
    thread::JoinHandle,
};

use crate::deps::log::{
    debug,
    warn,
};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue:        Mutex<std::collections::VecDeque<Task>>,
    has_work:     Condvar,
    idle:         Condvar,
    active_tasks: AtomicUsize,
    stop:         AtomicBool,
}

impl Shared {
    fn is_idle(&self) -> bool {
        self.active_tasks.load(Ordering::SeqCst) == 0 && self.queue.lock().unwrap().is_empty()
    }
}

pub struct ThreadPool {
    shared:  Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// `count` of zero is treated as one worker; callers typically pass
    /// `std::thread::available_parallelism()`.
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        let shared = Arc::new(Shared {
            queue:        Mutex::new(std::collections::VecDeque::new()),
            has_work:     Condvar::new(),
            idle:         Condvar::new(),
            active_tasks: AtomicUsize::new(0),
            stop:         AtomicBool::new(false),
        });

        let workers = (0..count)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("chainseer-worker-{}", id))
                    .spawn(move || Self::work_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ThreadPool { shared, workers }
    }

    fn work_loop(shared: Arc<Shared>) {
        loop {
            let task = {
                let mut queue = shared.queue.lock().unwrap();
                loop {
                    if let Some(task) = queue.pop_front() {
                        break Some(task);
                    }
                    if shared.stop.load(Ordering::SeqCst) {
                        break None;
                    }
                    queue = shared.has_work.wait(queue).unwrap();
                }
            };

            let task = match task {
                Some(task) => task,
                None => break,
            };

            shared.active_tasks.fetch_add(1, Ordering::SeqCst);
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                warn!("panicked task in thread pool worker: {:?}", panic_message(&panic));
            }
            shared.active_tasks.fetch_sub(1, Ordering::SeqCst);

            if shared.is_idle() {
                shared.idle.notify_all();
            }
        }
    }

    /// Enqueues `f` to run on some worker. Returns immediately.
    pub fn execute<F>(
        &self,
        f: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.lock().unwrap().push_back(Box::new(f));
        self.shared.has_work.notify_one();
    }

    /// Enqueues `f` and returns a channel the caller can `.recv()` the
    /// result from once the task completes.
    pub fn submit<F, T>(
        &self,
        f: F,
    ) -> mpsc::Receiver<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.execute(move || {
            let _ = tx.send(f());
        });
        rx
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn active_tasks(&self) -> usize {
        self.shared.active_tasks.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }

    /// Blocks until the queue is empty AND no task is in flight.
    pub fn wait(&self) {
        let queue = self.shared.queue.lock().unwrap();
        let _guard = self
            .shared
            .idle
            .wait_while(queue, |queue| {
                !queue.is_empty() || self.shared.active_tasks.load(Ordering::SeqCst) != 0
            })
            .unwrap();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        debug!("stopping thread pool with {} workers", self.workers.len());
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.has_work.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    use super::*;

    #[test]
    fn executes_every_submitted_task() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(StdAtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn submit_returns_the_result() {
        let pool = ThreadPool::new(2);
        let rx = pool.submit(|| 2 + 2);
        assert_eq!(rx.recv().unwrap(), 4);
    }

    #[test]
    fn a_panicking_task_does_not_poison_the_pool() {
        let pool = ThreadPool::new(2);
        pool.execute(|| panic!("boom"));
        pool.wait();

        let rx = pool.submit(|| 1);
        assert_eq!(rx.recv().unwrap(), 1);
    }

    #[test]
    fn wait_blocks_until_idle() {
        let pool = ThreadPool::new(1);
        let done = Arc::new(AtomicBool::new(false));
        let done2 = Arc::clone(&done);
        pool.execute(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            done2.store(true, Ordering::SeqCst);
        });
        pool.wait();
        assert!(done.load(Ordering::SeqCst));
    }
}
