// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Minimal scheduling collaborator: execute N independent tasks and return
//! once all have completed. Tasks do not communicate; callers hand out
//! disjoint work by task index.

use std::sync::atomic::{AtomicUsize, Ordering};

pub trait ParallelRunner: Sync {
    /// Runs `f(0..num_tasks)` in unspecified order and returns when every
    /// call has finished.
    fn run(&self, num_tasks: usize, f: &(dyn Fn(usize) + Sync));
}

/// Runs every task on the calling thread.
pub struct Sequential;

impl ParallelRunner for Sequential {
    fn run(&self, num_tasks: usize, f: &(dyn Fn(usize) + Sync)) {
        for task in 0..num_tasks {
            f(task);
        }
    }
}

/// Scoped worker threads pulling task indices from a shared counter.
pub struct ThreadPool {
    num_threads: usize,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> ThreadPool {
        ThreadPool {
            num_threads: num_threads.max(1),
        }
    }
}

impl ParallelRunner for ThreadPool {
    fn run(&self, num_tasks: usize, f: &(dyn Fn(usize) + Sync)) {
        let workers = self.num_threads.min(num_tasks);
        if workers <= 1 {
            Sequential.run(num_tasks, f);
            return;
        }
        let next = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let task = next.fetch_add(1, Ordering::Relaxed);
                    if task >= num_tasks {
                        break;
                    }
                    f(task);
                });
            }
        });
    }
}
