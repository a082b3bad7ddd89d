//! Index-addressed worker pool
//!
//! Runs one closure per item on a fixed number of threads, writing each
//! result into the slot matching its item index. The pool joins every
//! worker before returning, so a phase built on it forms a full barrier:
//! nothing from the next phase starts while any item is still in flight.

use crossbeam_channel::unbounded;
use std::thread;

/// Apply `job` to every index in `0..count` and collect results in index
/// order. `workers` caps the number of threads; one worker degenerates to
/// a plain in-order loop, which is also the parallel semantics observed
/// from outside.
///
/// A slot is `None` only if its job panicked; callers substitute their
/// own failure record so downstream stages never see a hole.
pub fn map_indexed<T, F>(count: usize, workers: usize, job: F) -> Vec<Option<T>>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let mut slots: Vec<Option<T>> = Vec::with_capacity(count);
    slots.resize_with(count, || None);
    if count == 0 {
        return slots;
    }

    let workers = workers.max(1).min(count);
    if workers == 1 {
        for (index, slot) in slots.iter_mut().enumerate() {
            *slot = Some(job(index));
        }
        return slots;
    }

    let (job_tx, job_rx) = unbounded::<usize>();
    let (result_tx, result_rx) = unbounded::<(usize, T)>();
    for index in 0..count {
        if job_tx.send(index).is_err() {
            break;
        }
    }
    drop(job_tx);

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let job = &job;
            handles.push(scope.spawn(move || {
                for index in job_rx.iter() {
                    if result_tx.send((index, job(index))).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        for (index, result) in result_rx.iter() {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }
        for handle in handles {
            // A worker that panicked mid-job already left its slot empty.
            let _ = handle.join();
        }
    });

    slots
}
