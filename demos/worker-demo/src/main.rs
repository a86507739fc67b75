//! Tiny multi-threaded worker pool driving `starpu-core` via
//! `starpu-policy-fifo`, demonstrating the worker-count and
//! congestion-fallback knobs a deployment needs on top of the
//! otherwise parameter-free dependency core (`starpu-core` itself
//! persists no configuration; see `handle_register`/`task_submit` in
//! its public API).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use starpu_core::{Access, Dispatcher};
use starpu_policy_fifo::FifoPolicy;

type Job = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Deployment-level knobs. The dependency core itself takes none of these;
/// they belong entirely to this demo's worker pool.
struct Config {
    /// Number of worker threads pulling from the shared FIFO.
    worker_count: usize,
    /// Whether workers back off with a short sleep between empty polls
    /// instead of busy-spinning — an optional "congestion fallback" a
    /// deployment may or may not want; this demo supplies the simplest
    /// possible version of it (a sleep, not an arbiter-local request list)
    /// since a real one only pays off under arbiter contention this demo
    /// does not generate.
    congestion_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            congestion_fallback: true,
        }
    }
}

fn main() {
    env_logger::init();
    let config = Config::default();
    log::info!(
        "worker-demo: starting {} workers (congestion_fallback={})",
        config.worker_count,
        config.congestion_fallback
    );

    let policy = FifoPolicy::<Job>::new();
    let dispatcher = Dispatcher::new(policy.clone());

    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..config.worker_count)
        .map(|id| {
            let policy = policy.clone();
            let dispatcher = dispatcher.clone();
            let stop = stop.clone();
            let backoff = config.congestion_fallback;
            thread::spawn(move || loop {
                match policy.pop_for_worker(id) {
                    Some(task) => {
                        if let Some(job) = task.take_payload() {
                            job();
                        }
                        dispatcher.task_complete(task);
                    }
                    None => {
                        if stop.load(Ordering::Acquire) {
                            return;
                        }
                        if backoff {
                            thread::sleep(Duration::from_micros(200));
                        } else {
                            thread::yield_now();
                        }
                    }
                }
            })
        })
        .collect();

    let h = dispatcher.register_handle();
    let completed = Arc::new(AtomicUsize::new(0));
    const N: usize = 16;

    for i in 0..N {
        let completed = completed.clone();
        let access = if i % 4 == 0 { Access::w() } else { Access::r() };
        dispatcher
            .submit_new(
                [(h.clone(), access)],
                Box::new(move || {
                    log::debug!("worker-demo: running job {i}");
                    completed.fetch_add(1, Ordering::Relaxed);
                }) as Job,
            )
            .expect("valid task");
    }

    while completed.load(Ordering::Relaxed) < N {
        thread::sleep(Duration::from_millis(1));
    }

    stop.store(true, Ordering::Release);
    for w in workers {
        w.join().expect("worker thread panicked");
    }
    log::info!("worker-demo: all {N} jobs completed");
}
