// SPDX-License-Identifier: MPL-2.0
//! Partitioning of the article set and a pool of isolated workers.
//!
//! Workers are OS threads that share nothing but the read-only task closure. Everything a
//! worker mutates (database connection, HTTP clients) is created inside the worker, so a
//! panicking worker only loses its own partition.

use std::{any::Any, env, io, thread};

/// Environment variable listing the accelerator devices visible to this process.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Identity of one worker: its position in the pool and the device it is bound to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub index: usize,
    pub device: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {index} could not be started")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("worker {index} panicked: {message}")]
    Panicked { index: usize, message: String },
}

/// Split `items` into exactly `max(parts, 1)` contiguous chunks whose sizes differ by at most
/// one; the leading chunks take the remainder. Concatenating the chunks gives back `items`.
pub fn partition<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let parts = parts.max(1);
    let base = items.len() / parts;
    let remainder = items.len() % parts;

    let mut items = items.into_iter();
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < remainder);
            items.by_ref().take(size).collect()
        })
        .collect()
}

/// Number of devices listed in a `CUDA_VISIBLE_DEVICES`-style value.
pub fn parse_visible_devices(value: Option<&str>) -> usize {
    let Some(value) = value else {
        return 0;
    };
    let ids: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    // "-1" hides every device
    if ids.first().is_some_and(|id| id.starts_with('-')) {
        return 0;
    }
    ids.len()
}

pub fn detect_devices() -> usize {
    parse_visible_devices(env::var(VISIBLE_DEVICES_ENV).ok().as_deref())
}

/// One context per worker: `workers_per_device` workers for every device, assigned round
/// robin, or `workers_per_device` unbound workers when there are no devices.
pub fn worker_contexts(devices: usize, workers_per_device: usize) -> Vec<WorkerContext> {
    let workers_per_device = workers_per_device.max(1);
    if devices == 0 {
        return (0..workers_per_device)
            .map(|index| WorkerContext {
                index,
                device: None,
            })
            .collect();
    }

    (0..devices * workers_per_device)
        .map(|index| WorkerContext {
            index,
            device: Some(index % devices),
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `task` once per `(context, partition)` pair, each on its own named thread, and wait
/// for all of them. Results are returned in input order.
pub fn run_isolated<T, R, F>(
    assignments: Vec<(WorkerContext, T)>,
    task: F,
) -> Vec<Result<R, WorkerError>>
where
    T: Send,
    R: Send,
    F: Fn(WorkerContext, T) -> R + Sync,
{
    let task = &task;
    thread::scope(|scope| {
        let handles: Vec<_> = assignments
            .into_iter()
            .map(|(context, partition)| {
                let handle = thread::Builder::new()
                    .name(format!("worker-{}", context.index))
                    .spawn_scoped(scope, move || {
                        let _span = tracing::info_span!(
                            "worker",
                            worker = context.index,
                            device = ?context.device
                        )
                        .entered();
                        task(context, partition)
                    });
                (context.index, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(index, handle)| {
                let handle = handle.map_err(|source| WorkerError::Spawn { index, source })?;
                handle.join().map_err(|payload| WorkerError::Panicked {
                    index,
                    message: panic_message(payload.as_ref()),
                })
            })
            .collect()
    })
}
