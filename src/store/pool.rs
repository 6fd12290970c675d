//! Fixed-size I/O worker pool.
//!
//! Работа (запись/чтение записей, разбор буферов обмена) уходит сюда, чтобы не
//! занимать тиковый поток. Результаты, которые трогают мир, возвращаются только
//! через `SchedulerHandle`.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{VaultError, VaultResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct IoPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for IoPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(|e| e.into_inner());
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

impl IoPool {
    pub fn new(threads: usize) -> VaultResult<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let h = std::thread::Builder::new()
                .name(format!("iv-io-{i}"))
                .spawn(move || worker_loop(rx))?;
            workers.push(h);
        }
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> VaultResult<()> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx
                .send(Box::new(job))
                .map_err(|_| VaultError::Io("i/o pool is shut down".into())),
            None => Err(VaultError::Io("i/o pool is shut down".into())),
        }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        // закрыть канал: рабочие доработают очередь и выйдут
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        for h in self.workers.drain(..) {
            let _ = h.join();
        }
    }
}
