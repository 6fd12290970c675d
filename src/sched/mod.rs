//! Cooperative tick scheduler.
//!
//! Однопоточный драйвер: хост вызывает `Scheduler::tick` раз в такт, каждая
//! задача делает ограниченный кусок работы и возвращает управление.
//!
//! - Задачи это возобновляемые объекты (`Task::run`), состояние живёт в самой
//!   задаче, а не в замыкании.
//! - Из задачи можно планировать/отменять другие задачи через `TickContext`.
//! - `SchedulerHandle` (Send + Clone) единственный путь, которым рабочие
//!   потоки передают результаты на тиковый поток: замыкание выполняется в начале
//!   следующего такта.
//! - Задачи с отменённым `CancelToken` снимаются до запуска; перед этим
//!   вызывается `Task::cancelled`, чтобы задача освободила свои ресурсы.
//!   Явный `cancel(id)` хук не вызывает.

pub mod promise;

pub use promise::{CancelToken, Promise};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::world::Host;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Запустить снова (через период; одноразовая задача в следующем такте).
    Continue,
    Done,
}

pub trait Task {
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus;

    /// Токен задачи отменён, задача снимается и больше не запустится.
    fn cancelled(&mut self, _cx: &mut TickContext<'_>) {}
}

impl<F> Task for F
where
    F: FnMut(&mut TickContext<'_>) -> TaskStatus,
{
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus {
        self(cx)
    }
}

type Marshalled = Box<dyn FnOnce(&mut TickContext<'_>) + Send>;
type Inbox = Arc<Mutex<Vec<Marshalled>>>;

struct Entry {
    due: u64,
    period: u64,
    task: Box<dyn Task>,
    token: Option<CancelToken>,
}

impl Entry {
    fn is_cancelled(&self) -> bool {
        self.token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }
}

/// Cross-thread handle: queues closures for the tick thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    inbox: Inbox,
}

impl SchedulerHandle {
    pub fn post(&self, f: impl FnOnce(&mut TickContext<'_>) + Send + 'static) {
        self.inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(f));
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SchedulerHandle")
    }
}

/// What a running task sees: the host plus scheduling primitives.
pub struct TickContext<'a> {
    pub host: &'a mut dyn Host,
    tick: u64,
    next_id: &'a mut TaskId,
    spawned: Vec<(TaskId, Entry)>,
    cancelled: Vec<TaskId>,
    handle: SchedulerHandle,
}

impl<'a> TickContext<'a> {
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    fn push(
        &mut self,
        delay: u64,
        period: u64,
        token: Option<CancelToken>,
        task: Box<dyn Task>,
    ) -> TaskId {
        let id = *self.next_id;
        *self.next_id += 1;
        self.spawned.push((
            id,
            Entry {
                due: self.tick + delay.max(1),
                period: period.max(1),
                task,
                token,
            },
        ));
        id
    }

    pub fn run_later(&mut self, delay: u64, task: impl Task + 'static) -> TaskId {
        self.push(delay, 1, None, Box::new(task))
    }

    pub fn run_repeating(&mut self, delay: u64, period: u64, task: impl Task + 'static) -> TaskId {
        self.push(delay, period, None, Box::new(task))
    }

    /// Как run_repeating, но задача живёт, пока не отменён `token`.
    pub fn run_guarded(
        &mut self,
        delay: u64,
        period: u64,
        token: CancelToken,
        task: impl Task + 'static,
    ) -> TaskId {
        self.push(delay, period, Some(token), Box::new(task))
    }

    pub fn cancel(&mut self, id: TaskId) {
        self.cancelled.push(id);
    }
}

pub struct Scheduler {
    tick: u64,
    next_id: TaskId,
    entries: BTreeMap<TaskId, Entry>,
    inbox: Inbox,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            tick: 0,
            next_id: 1,
            entries: BTreeMap::new(),
            inbox: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.tick)
            .field("active", &self.entries.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inbox: self.inbox.clone(),
        }
    }

    fn insert(
        &mut self,
        delay: u64,
        period: u64,
        token: Option<CancelToken>,
        task: Box<dyn Task>,
    ) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                due: self.tick + delay.max(1),
                period: period.max(1),
                task,
                token,
            },
        );
        id
    }

    /// Запустить задачу через `delay` тактов (минимум 1: в следующем такте).
    pub fn run_later(&mut self, delay: u64, task: impl Task + 'static) -> TaskId {
        self.insert(delay, 1, None, Box::new(task))
    }

    pub fn run_repeating(&mut self, delay: u64, period: u64, task: impl Task + 'static) -> TaskId {
        self.insert(delay, period, None, Box::new(task))
    }

    pub fn run_guarded(
        &mut self,
        delay: u64,
        period: u64,
        token: CancelToken,
        task: impl Task + 'static,
    ) -> TaskId {
        self.insert(delay, period, Some(token), Box::new(task))
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.entries.get(&id).map(|e| !e.is_cancelled()).unwrap_or(false)
    }

    /// Число живых (не отменённых) задач.
    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|e| !e.is_cancelled()).count()
    }

    /// Есть ли работа: задачи или сообщения от рабочих потоков.
    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
            && self
                .inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_empty()
    }

    /// Один такт: сообщения из inbox, затем все задачи, срок которых наступил.
    pub fn tick(&mut self, host: &mut dyn Host) {
        self.tick += 1;
        let now = self.tick;
        let marshalled: Vec<Marshalled> =
            std::mem::take(&mut *self.inbox.lock().unwrap_or_else(|e| e.into_inner()));
        let handle = SchedulerHandle {
            inbox: self.inbox.clone(),
        };

        let mut cx = TickContext {
            host,
            tick: now,
            next_id: &mut self.next_id,
            spawned: Vec::new(),
            cancelled: Vec::new(),
            handle,
        };

        for f in marshalled {
            f(&mut cx);
        }
        for id in cx.cancelled.drain(..) {
            self.entries.remove(&id);
        }

        let due: Vec<TaskId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.due <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            if cx.cancelled.contains(&id) {
                self.entries.remove(&id);
                continue;
            }
            let mut entry = match self.entries.remove(&id) {
                Some(e) => e,
                None => continue,
            };
            if entry.is_cancelled() {
                entry.task.cancelled(&mut cx);
                continue;
            }
            let status = entry.task.run(&mut cx);
            if status == TaskStatus::Continue && !cx.cancelled.contains(&id) {
                if entry.is_cancelled() {
                    entry.task.cancelled(&mut cx);
                } else {
                    entry.due = now + entry.period;
                    self.entries.insert(id, entry);
                }
            }
        }

        let spawned = std::mem::take(&mut cx.spawned);
        self.entries.extend(spawned);
        for id in cx.cancelled.drain(..) {
            self.entries.remove(&id);
        }
        // задачи, чей токен отменили вне их собственного запуска
        let dropped: Vec<TaskId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_cancelled())
            .map(|(id, _)| *id)
            .collect();
        for id in dropped {
            if let Some(mut e) = self.entries.remove(&id) {
                e.task.cancelled(&mut cx);
            }
        }

        let TickContext {
            spawned, cancelled, ..
        } = cx;
        self.entries.extend(spawned);
        for id in cancelled {
            self.entries.remove(&id);
        }
    }

    /// Крутить такты, пока не останется работы (или `max_ticks`).
    /// Возвращает число выполненных тактов.
    pub fn run_until_idle(&mut self, host: &mut dyn Host, max_ticks: u64) -> u64 {
        let mut n = 0;
        while n < max_ticks && !self.is_idle() {
            self.tick(host);
            n += 1;
        }
        n
    }

    /// Крутить такты, пока `done()` не вернёт true (или `max_ticks`).
    /// Между тактами отдаёт время рабочим потокам.
    pub fn run_until(
        &mut self,
        host: &mut dyn Host,
        max_ticks: u64,
        mut done: impl FnMut() -> bool,
    ) -> bool {
        for _ in 0..max_ticks {
            if done() {
                return true;
            }
            self.tick(host);
            if self.active_count() == 0 {
                std::thread::yield_now();
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::MemoryHost;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn run_later_fires_once_after_delay() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let hits = Rc::new(Cell::new(0u32));
        let h = hits.clone();
        s.run_later(3, move |_: &mut TickContext<'_>| {
            h.set(h.get() + 1);
            TaskStatus::Done
        });
        s.tick(&mut host);
        s.tick(&mut host);
        assert_eq!(hits.get(), 0);
        s.tick(&mut host);
        assert_eq!(hits.get(), 1);
        assert_eq!(s.current_tick(), 3);
        s.run_until_idle(&mut host, 10);
        assert_eq!(hits.get(), 1);
        assert_eq!(s.active_count(), 0);
    }

    #[test]
    fn repeating_respects_period_and_cancel() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let hits = Rc::new(Cell::new(0u32));
        let h = hits.clone();
        let id = s.run_repeating(1, 2, move |_: &mut TickContext<'_>| {
            h.set(h.get() + 1);
            TaskStatus::Continue
        });
        for _ in 0..5 {
            s.tick(&mut host);
        }
        // ticks 1, 3, 5
        assert_eq!(hits.get(), 3);
        assert!(s.cancel(id));
        assert!(!s.is_active(id));
        s.tick(&mut host);
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn tasks_spawn_and_cancel_through_context() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let hits = Rc::new(Cell::new(0u32));
        let h = hits.clone();
        s.run_later(1, move |cx: &mut TickContext<'_>| {
            let h2 = h.clone();
            let victim = cx.run_repeating(1, 1, move |_: &mut TickContext<'_>| {
                h2.set(h2.get() + 100);
                TaskStatus::Continue
            });
            cx.cancel(victim);
            let h3 = h.clone();
            cx.run_later(1, move |_: &mut TickContext<'_>| {
                h3.set(h3.get() + 1);
                TaskStatus::Done
            });
            TaskStatus::Done
        });
        s.run_until_idle(&mut host, 10);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn token_cancellation_drops_task() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let token = CancelToken::new();
        let id = s.run_guarded(1, 1, token.clone(), |_: &mut TickContext<'_>| TaskStatus::Continue);
        s.tick(&mut host);
        assert!(s.is_active(id));
        token.cancel();
        assert_eq!(s.active_count(), 0);
        s.tick(&mut host);
        assert!(!s.is_active(id));
    }

    struct Guarded {
        runs: Rc<Cell<u32>>,
        released: Rc<Cell<u32>>,
    }

    impl Task for Guarded {
        fn run(&mut self, _cx: &mut TickContext<'_>) -> TaskStatus {
            self.runs.set(self.runs.get() + 1);
            TaskStatus::Continue
        }

        fn cancelled(&mut self, _cx: &mut TickContext<'_>) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[test]
    fn cancelled_token_runs_release_hook_once() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let token = CancelToken::new();
        let runs = Rc::new(Cell::new(0u32));
        let released = Rc::new(Cell::new(0u32));
        let (r, rel, t) = (runs.clone(), released.clone(), token.clone());
        // задача, порождённая из контекста, охраняется тем же токеном
        s.run_later(1, move |cx: &mut TickContext<'_>| {
            cx.run_guarded(
                1,
                1,
                t.clone(),
                Guarded {
                    runs: r.clone(),
                    released: rel.clone(),
                },
            );
            TaskStatus::Done
        });
        s.tick(&mut host);
        s.tick(&mut host);
        assert_eq!(runs.get(), 1);
        assert_eq!(s.active_count(), 1);

        token.cancel();
        s.tick(&mut host);
        s.tick(&mut host);
        assert_eq!(runs.get(), 1);
        assert_eq!(released.get(), 1);
        assert!(s.is_idle());
    }

    #[test]
    fn explicit_cancel_skips_release_hook() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let runs = Rc::new(Cell::new(0u32));
        let released = Rc::new(Cell::new(0u32));
        let id = s.run_guarded(
            1,
            1,
            CancelToken::new(),
            Guarded {
                runs: runs.clone(),
                released: released.clone(),
            },
        );
        s.tick(&mut host);
        assert!(s.cancel(id));
        s.tick(&mut host);
        assert_eq!((runs.get(), released.get()), (1, 0));
    }

    #[test]
    fn handle_marshals_from_other_thread() {
        let mut s = Scheduler::new();
        let mut host = MemoryHost::new();
        let p: Promise<u64> = Promise::new();
        let handle = s.handle();
        let p2 = p.clone();
        std::thread::spawn(move || {
            handle.post(move |cx| {
                p2.resolve(cx.tick());
            });
        })
        .join()
        .unwrap();
        assert!(!p.is_done());
        s.tick(&mut host);
        assert_eq!(p.outcome(), Some(Ok(1)));
    }
}
