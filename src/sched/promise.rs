//! Promise<T> and CancelToken.
//!
//! Promise: разделяемая ячейка завершения (Arc<Mutex<..>>) с любым числом
//! наблюдателей. Завершается ровно один раз: первый resolve/fail выигрывает,
//! последующие игнорируются. Наблюдатели вызываются вне блокировки и получают
//! копию результата.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{VaultError, VaultResult};

/// Флаг отмены, общий для промиса и его задач.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Observer<T> = Box<dyn FnOnce(VaultResult<T>) + Send>;

struct Inner<T> {
    result: Option<VaultResult<T>>,
    observers: Vec<Observer<T>>,
}

pub struct Promise<T> {
    inner: Arc<Mutex<Inner<T>>>,
    token: CancelToken,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = self.lock().result.is_some();
        f.debug_struct("Promise")
            .field("done", &done)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                result: None,
                observers: Vec::new(),
            })),
            token: CancelToken::new(),
        }
    }
}

impl<T> Promise<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // отравление не мешает, состояние это Option + список наблюдателей
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_done(&self) -> bool {
        self.lock().result.is_some()
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T: Clone> Promise<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Завершить промис. Возвращает false, если он уже был завершён.
    pub fn complete(&self, result: VaultResult<T>) -> bool {
        let observers = {
            let mut g = self.lock();
            if g.result.is_some() {
                return false;
            }
            g.result = Some(result.clone());
            std::mem::take(&mut g.observers)
        };
        for obs in observers {
            obs(result.clone());
        }
        true
    }

    pub fn resolve(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, err: VaultError) -> bool {
        self.complete(Err(err))
    }

    /// Подписаться на завершение. Если промис уже завершён, наблюдатель
    /// вызывается сразу (в текущем потоке).
    pub fn on_complete(&self, f: impl FnOnce(VaultResult<T>) + Send + 'static) {
        let mut g = self.lock();
        if g.result.is_none() {
            g.observers.push(Box::new(f));
            return;
        }
        let ready = g.result.clone();
        drop(g);
        if let Some(r) = ready {
            f(r);
        }
    }

    /// Текущий результат (копия) или None, пока промис не завершён.
    pub fn outcome(&self) -> Option<VaultResult<T>> {
        self.lock().result.clone()
    }

    /// Отменить: задачи, привязанные к токену, больше не запустятся;
    /// промис (если ещё не завершён) падает с `Cancelled`.
    pub fn cancel(&self) -> bool {
        self.token.cancel();
        self.fail(VaultError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn first_completion_wins_and_all_observers_fire() {
        let p: Promise<u32> = Promise::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = hits.clone();
            p.on_complete(move |r| {
                assert_eq!(r, Ok(7));
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(p.resolve(7));
        assert!(!p.fail(VaultError::Cancelled));
        assert_eq!(p.outcome(), Some(Ok(7)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // поздний наблюдатель вызывается сразу
        let h = hits.clone();
        p.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cancel_sets_token_and_fails() {
        let p: Promise<()> = Promise::new();
        assert!(p.cancel());
        assert!(p.token().is_cancelled());
        assert_eq!(p.outcome(), Some(Err(VaultError::Cancelled)));
    }
}
