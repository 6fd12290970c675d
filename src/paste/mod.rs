//! PasteEngine: keyed paste sessions driven by the tick scheduler.
//!
//! Состояния сессии:
//!   Idle -> Preparing -> (Committing | Placing) -> [Revealing] -> Completed
//!   любое нетерминальное -> Failed | Cancelled
//!
//! Замечания:
//! - на ключ не больше одной активной сессии (иначе Busy);
//! - таймаут взводится при begin; по истечении сессия принудительно падает
//!   с Timeout, её задачи снимаются, учёт удаляется;
//! - после cancel/timeout сессия больше не пишет в мир: её задача привязана
//!   к токену промиса и выбрасывается планировщиком;
//! - отмена через сам промис (`PasteHandle::promise().cancel()`) освобождает
//!   ключ так же, как `PasteEngine::cancel`, но на следующем такте.

pub mod clipboard;
pub mod reveal;

pub use clipboard::{
    ApplyStats, ClipCell, Clipboard, ClipboardCache, ClipboardLoader, TagClipboardLoader,
};
pub use reveal::{find_marker_region, find_safe_spot, stages, RevealStage};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::config::VaultConfig;
use crate::consts::{MAX_MARKER_CELLS, PASTE_CUE_EVERY};
use crate::error::{VaultError, VaultResult};
use crate::metrics;
use crate::sched::{CancelToken, Promise, Scheduler, Task, TaskId, TaskStatus, TickContext};
use crate::snapshot::{Location, Pos};
use crate::store::IoPool;
use crate::world::{Cue, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteMode {
    /// Всё за один шаг.
    Instant,
    /// По `paste_cells_per_tick` клеток за такт, затем reveal.
    Animated,
}

#[derive(Debug, Clone)]
pub enum ClipboardSource {
    InMemory(Arc<Clipboard>),
    /// Загружается через `ClipboardCache` на пуле ввода-вывода.
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PasteRequest {
    pub session: String,
    pub source: ClipboardSource,
    pub target: Location,
    pub mode: PasteMode,
    pub placeholders: Vec<(String, String)>,
}

impl PasteRequest {
    pub fn new(
        session: impl Into<String>,
        source: ClipboardSource,
        target: Location,
        mode: PasteMode,
    ) -> Self {
        Self {
            session: session.into(),
            source,
            target,
            mode,
            placeholders: Vec::new(),
        }
    }

    pub fn with_placeholder(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.placeholders.push((from.into(), to.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PasteState {
    Idle,
    Preparing,
    Committing,
    Placing,
    Revealing,
    Completed,
    Failed(VaultError),
    Cancelled,
}

impl PasteState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PasteState::Completed | PasteState::Failed(_) | PasteState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasteStatus {
    pub state: PasteState,
    /// 0.0..=1.0, доля поставленных клеток.
    pub progress: f64,
}

type SharedStatus = Arc<Mutex<PasteStatus>>;

fn set_status(status: &SharedStatus, state: PasteState, progress: Option<f64>) {
    let mut g = status.lock().unwrap_or_else(|e| e.into_inner());
    g.state = state;
    if let Some(p) = progress {
        g.progress = p.clamp(0.0, 1.0);
    }
}

/// Caller's view of a running session.
#[derive(Debug, Clone)]
pub struct PasteHandle {
    session: String,
    promise: Promise<Location>,
    status: SharedStatus,
}

impl PasteHandle {
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Resolves to the output location (where to put the operator).
    pub fn promise(&self) -> &Promise<Location> {
        &self.promise
    }

    pub fn status(&self) -> PasteStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn state(&self) -> PasteState {
        self.status().state
    }

    pub fn progress(&self) -> f64 {
        self.status().progress
    }
}

struct SessionEntry {
    serial: u64,
    job_id: TaskId,
    timeout_id: TaskId,
    token: CancelToken,
    promise: Promise<Location>,
    status: SharedStatus,
}

type Sessions = Rc<RefCell<HashMap<String, SessionEntry>>>;

/// Снять запись сессии, если она всё ещё принадлежит `serial`.
fn take_session(sessions: &Sessions, key: &str, serial: u64) -> Option<SessionEntry> {
    let mut s = sessions.borrow_mut();
    match s.get(key) {
        Some(e) if e.serial == serial => s.remove(key),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct PasteSettings {
    cells_per_tick: usize,
    reveal_interval: u64,
    marker_radius: i32,
    marker_kinds: Vec<String>,
    cues: bool,
}

impl From<&VaultConfig> for PasteSettings {
    fn from(cfg: &VaultConfig) -> Self {
        Self {
            cells_per_tick: cfg.paste_cells_per_tick.max(1),
            reveal_interval: cfg.reveal_interval_ticks.max(1),
            marker_radius: cfg.marker_radius,
            marker_kinds: cfg.marker_kinds.clone(),
            cues: cfg.paste_cues,
        }
    }
}

/// Owns the session table. Lives on the tick thread.
pub struct PasteEngine {
    settings: PasteSettings,
    timeout_ticks: u64,
    cache: Arc<ClipboardCache>,
    pool: Arc<IoPool>,
    sessions: Sessions,
    serial: Cell<u64>,
}

impl std::fmt::Debug for PasteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasteEngine")
            .field("active", &self.active_sessions())
            .field("timeout_ticks", &self.timeout_ticks)
            .finish()
    }
}

impl PasteEngine {
    pub fn new(cfg: &VaultConfig, pool: Arc<IoPool>, cache: Arc<ClipboardCache>) -> Self {
        Self {
            settings: PasteSettings::from(cfg),
            timeout_ticks: cfg.paste_timeout_ticks.max(1),
            cache,
            pool,
            sessions: Rc::new(RefCell::new(HashMap::new())),
            serial: Cell::new(0),
        }
    }

    /// Собственный пул и кэш с загрузчиком tag-файлов.
    pub fn with_defaults(cfg: &VaultConfig) -> VaultResult<Self> {
        let pool = Arc::new(IoPool::new(cfg.io_threads)?);
        let cache = Arc::new(ClipboardCache::new(Arc::new(TagClipboardLoader)));
        Ok(Self::new(cfg, pool, cache))
    }

    pub fn cache(&self) -> &ClipboardCache {
        &self.cache
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.sessions.borrow().contains_key(key)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Состояние сессии по ключу; `Idle`, если сессии нет.
    pub fn state(&self, key: &str) -> PasteState {
        self.sessions
            .borrow()
            .get(key)
            .map(|e| e.status.lock().unwrap_or_else(|p| p.into_inner()).state.clone())
            .unwrap_or(PasteState::Idle)
    }

    fn source_promise(
        &self,
        sched: &Scheduler,
        source: &ClipboardSource,
    ) -> VaultResult<Promise<Arc<Clipboard>>> {
        let p = Promise::new();
        match source {
            ClipboardSource::InMemory(c) => {
                p.resolve(c.clone());
            }
            ClipboardSource::Path(path) => {
                let (cache, handle, out, path) =
                    (self.cache.clone(), sched.handle(), p.clone(), path.clone());
                self.pool.submit(move || {
                    let res = cache.get_or_load(&path);
                    if let Err(e) = &res {
                        log::error!("paste: clipboard {} not loaded: {}", path.display(), e);
                    }
                    handle.post(move |_| {
                        out.complete(res);
                    });
                })?;
            }
        }
        Ok(p)
    }

    pub fn begin(&self, sched: &mut Scheduler, req: PasteRequest) -> VaultResult<PasteHandle> {
        if req.session.is_empty() {
            return Err(VaultError::invalid("paste session key is empty"));
        }
        if self.is_active(&req.session) {
            return Err(VaultError::Busy(req.session));
        }

        let source = self.source_promise(sched, &req.source)?;
        let promise: Promise<Location> = Promise::new();
        let status: SharedStatus = Arc::new(Mutex::new(PasteStatus {
            state: PasteState::Preparing,
            progress: 0.0,
        }));
        let serial = self.serial.get() + 1;
        self.serial.set(serial);

        let job = PasteJob {
            key: req.session.clone(),
            serial,
            world: req.target.world.clone(),
            target: req.target,
            mode: req.mode,
            placeholders: req.placeholders,
            source,
            clip: None,
            anchor: Pos::default(),
            phase: Phase::Preparing,
            settings: self.settings.clone(),
            promise: promise.clone(),
            status: status.clone(),
            sessions: self.sessions.clone(),
        };
        let job_id = sched.run_guarded(1, 1, promise.token(), job);
        let timeout_id = sched.run_later(
            self.timeout_ticks,
            PasteTimeout {
                key: req.session.clone(),
                serial,
                ticks: self.timeout_ticks,
                sessions: self.sessions.clone(),
            },
        );
        self.sessions.borrow_mut().insert(
            req.session.clone(),
            SessionEntry {
                serial,
                job_id,
                timeout_id,
                token: promise.token(),
                promise: promise.clone(),
                status: status.clone(),
            },
        );
        log::info!("paste: session '{}' started ({:?})", req.session, req.mode);
        Ok(PasteHandle {
            session: req.session,
            promise,
            status,
        })
    }

    /// Отменить сессию. false, если по ключу ничего не выполняется.
    pub fn cancel(&self, sched: &mut Scheduler, key: &str) -> bool {
        let Some(e) = self.sessions.borrow_mut().remove(key) else {
            return false;
        };
        e.token.cancel();
        sched.cancel(e.job_id);
        sched.cancel(e.timeout_id);
        if e.promise.fail(VaultError::Cancelled) {
            set_status(&e.status, PasteState::Cancelled, None);
            metrics::record_paste_cancelled();
            log::info!("paste: session '{}' cancelled", key);
        }
        true
    }
}

// ---------------------- session task ----------------------

struct Reveal {
    stages: Vec<RevealStage>,
    next: usize,
    wait: u64,
    cleared: bool,
}

enum Phase {
    Preparing,
    Committing,
    Placing { next: usize },
    Revealing(Reveal),
}

struct PasteJob {
    key: String,
    serial: u64,
    world: String,
    target: Location,
    mode: PasteMode,
    placeholders: Vec<(String, String)>,
    source: Promise<Arc<Clipboard>>,
    clip: Option<Arc<Clipboard>>,
    anchor: Pos,
    phase: Phase,
    settings: PasteSettings,
    promise: Promise<Location>,
    status: SharedStatus,
    sessions: Sessions,
}

fn missing(world: &str) -> VaultError {
    VaultError::MissingWorld(world.to_string())
}

/// Точка вывода: явная точка шаблона, иначе безопасная точка у центра
/// основания, иначе сама цель.
fn output_location(world: &dyn World, clip: &Clipboard, anchor: Pos, target: &Location) -> Location {
    if let Some(off) = clip.output() {
        return Location::new(target.world.clone(), anchor.add(off).center());
    }
    let (w, h, l) = clip.dimensions();
    let center = anchor.offset((w / 2) as i32, 0, (l / 2) as i32);
    let reach = (w.max(l) / 2) as i32 + 1;
    match find_safe_spot(world, center, reach, anchor.y, anchor.y + h as i32) {
        Some(pos) => Location::new(target.world.clone(), pos),
        None => {
            log::debug!("paste: no safe spot near {}, using the target", center);
            target.clone()
        }
    }
}

impl PasteJob {
    fn clip(&self) -> VaultResult<Arc<Clipboard>> {
        self.clip
            .clone()
            .ok_or_else(|| VaultError::invalid("clipboard is not prepared"))
    }

    fn step(&mut self, cx: &mut TickContext<'_>) -> VaultResult<Option<Location>> {
        match self.phase {
            Phase::Preparing => self.prepare(cx),
            Phase::Committing => self.commit(cx).map(Some),
            Phase::Placing { next } => self.place(cx, next),
            Phase::Revealing(_) => self.reveal(cx),
        }
    }

    fn prepare(&mut self, cx: &mut TickContext<'_>) -> VaultResult<Option<Location>> {
        let clip = match self.source.outcome() {
            None => return Ok(None),
            Some(r) => r?,
        };
        let clip = if self.placeholders.is_empty() {
            clip
        } else {
            // кэшированный шаблон не трогаем
            let mut own = (*clip).clone();
            let n: usize = self
                .placeholders
                .iter()
                .map(|(from, to)| own.substitute(from, to))
                .sum();
            log::debug!("paste: '{}' substituted {} placeholders", self.key, n);
            Arc::new(own)
        };
        if cx.host.world_mut(&self.world).is_none() {
            return Err(missing(&self.world));
        }
        let (w, _, l) = clip.dimensions();
        self.anchor = self
            .target
            .pos
            .cell()
            .offset(-((w / 2) as i32), 0, -((l / 2) as i32));
        self.clip = Some(clip);
        let state = match self.mode {
            PasteMode::Instant => {
                self.phase = Phase::Committing;
                PasteState::Committing
            }
            PasteMode::Animated => {
                self.phase = Phase::Placing { next: 0 };
                PasteState::Placing
            }
        };
        set_status(&self.status, state, Some(0.0));
        log::debug!("paste: '{}' anchored at {}", self.key, self.anchor);
        Ok(None)
    }

    fn commit(&mut self, cx: &mut TickContext<'_>) -> VaultResult<Location> {
        let clip = self.clip()?;
        let world = cx.host.world_mut(&self.world).ok_or_else(|| missing(&self.world))?;
        let st = clip.apply_all(world, self.anchor)?;
        metrics::record_paste_cells(st.cells);
        log::debug!(
            "paste: '{}' committed {} cells, {} objects ({} failed)",
            self.key,
            st.cells,
            st.objects,
            st.failed
        );
        Ok(output_location(&*world, &clip, self.anchor, &self.target))
    }

    fn place(&mut self, cx: &mut TickContext<'_>, next: usize) -> VaultResult<Option<Location>> {
        let clip = self.clip()?;
        let total = clip.cell_count();
        let end = (next + self.settings.cells_per_tick).min(total);
        let mut cues = Vec::new();
        let mut placed = 0usize;
        let mut outcome = None;
        {
            let world = cx.host.world_mut(&self.world).ok_or_else(|| missing(&self.world))?;
            for i in next..end {
                let Some(cell) = clip.cell_at(i) else { break };
                match cell.place(world, self.anchor) {
                    Ok(pos) => {
                        placed += 1;
                        if self.settings.cues && (i + 1) % PASTE_CUE_EVERY == 0 {
                            cues.push(Cue::CellPlaced {
                                world: self.world.clone(),
                                pos,
                                kind: cell.state.kind.clone(),
                            });
                        }
                    }
                    Err(e) => {
                        metrics::record_unit_failure();
                        log::warn!("paste: '{}' cell {} skipped: {}", self.key, i, e);
                    }
                }
            }
            metrics::record_paste_cells(placed);
            let progress = if total == 0 { 1.0 } else { end as f64 / total as f64 };
            set_status(&self.status, PasteState::Placing, Some(progress));

            if end >= total {
                let st = clip.spawn_objects(world, self.anchor);
                log::debug!(
                    "paste: '{}' placed {} cells, spawned {} objects",
                    self.key,
                    total,
                    st.objects
                );
                let (w, h, l) = clip.dimensions();
                let start = self.anchor.add(
                    clip.marker_anchor()
                        .unwrap_or(Pos::new((w / 2) as i32, (h / 2) as i32, (l / 2) as i32)),
                );
                let region = find_marker_region(
                    &*world,
                    start,
                    self.settings.marker_radius,
                    &self.settings.marker_kinds,
                    MAX_MARKER_CELLS,
                );
                if region.is_empty() {
                    outcome = Some(output_location(&*world, &clip, self.anchor, &self.target));
                } else {
                    log::debug!(
                        "paste: '{}' reveals {} marker cells",
                        self.key,
                        region.len()
                    );
                    self.phase = Phase::Revealing(Reveal {
                        stages: stages(&region),
                        next: 0,
                        wait: 0,
                        cleared: false,
                    });
                    set_status(&self.status, PasteState::Revealing, None);
                }
            } else {
                self.phase = Phase::Placing { next: end };
            }
        }
        for c in cues {
            cx.host.emit_cue(c);
        }
        Ok(outcome)
    }

    fn reveal(&mut self, cx: &mut TickContext<'_>) -> VaultResult<Option<Location>> {
        let clip = self.clip()?;
        let interval = self.settings.reveal_interval;
        let Phase::Revealing(r) = &mut self.phase else {
            return Ok(None);
        };
        if r.wait > 0 {
            r.wait -= 1;
            return Ok(None);
        }
        let world = cx.host.world_mut(&self.world).ok_or_else(|| missing(&self.world))?;
        if !r.cleared {
            for st in &r.stages {
                for (p, _) in &st.cells {
                    if let Err(e) = world.set_cell(*p, None) {
                        log::warn!("paste: '{}' marker {} not cleared: {}", self.key, p, e);
                    }
                }
            }
            r.cleared = true;
            r.wait = interval - 1;
            return Ok(None);
        }

        let Some(stage) = r.stages.get(r.next) else {
            return Ok(Some(output_location(&*world, &clip, self.anchor, &self.target)));
        };
        for (p, s) in &stage.cells {
            if let Err(e) = world.set_cell(*p, Some(s)) {
                metrics::record_unit_failure();
                log::warn!("paste: '{}' marker {} not restored: {}", self.key, p, e);
            }
        }
        let cue = Cue::RevealStage {
            world: self.world.clone(),
            stage: r.next,
            total: r.stages.len(),
            y: stage.y,
        };
        r.next += 1;
        r.wait = interval - 1;
        let finished = r.next >= r.stages.len();
        let loc = finished.then(|| output_location(&*world, &clip, self.anchor, &self.target));

        cx.host.emit_cue(cue);
        if let Some(loc) = &loc {
            cx.host.emit_cue(Cue::Finale {
                world: self.world.clone(),
                pos: loc.pos,
            });
        }
        Ok(loc)
    }

    /// Промис отменён снаружи: снять учёт и таймаут, отметить Cancelled.
    fn release_cancelled(&mut self, cx: &mut TickContext<'_>) {
        // engine.cancel или таймаут уже всё сделали
        let Some(e) = take_session(&self.sessions, &self.key, self.serial) else {
            return;
        };
        cx.cancel(e.timeout_id);
        self.promise.fail(VaultError::Cancelled);
        set_status(&self.status, PasteState::Cancelled, None);
        metrics::record_paste_cancelled();
        log::info!("paste: session '{}' cancelled", self.key);
    }

    fn finish(&mut self, cx: &mut TickContext<'_>, result: VaultResult<Location>) {
        if let Some(e) = take_session(&self.sessions, &self.key, self.serial) {
            cx.cancel(e.timeout_id);
        }
        match result {
            Ok(loc) => {
                if self.promise.resolve(loc.clone()) {
                    set_status(&self.status, PasteState::Completed, Some(1.0));
                    metrics::record_paste_completed();
                    log::info!(
                        "paste: session '{}' completed, output ({:.1}, {:.1}, {:.1})",
                        self.key,
                        loc.pos.x,
                        loc.pos.y,
                        loc.pos.z
                    );
                }
            }
            Err(e) => {
                log::error!("paste: session '{}' failed: {}", self.key, e);
                if self.promise.fail(e.clone()) {
                    set_status(&self.status, PasteState::Failed(e), None);
                    metrics::record_paste_failed();
                }
            }
        }
    }
}

impl Task for PasteJob {
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus {
        match self.step(cx) {
            Ok(None) => TaskStatus::Continue,
            Ok(Some(loc)) => {
                self.finish(cx, Ok(loc));
                TaskStatus::Done
            }
            Err(e) => {
                self.finish(cx, Err(e));
                TaskStatus::Done
            }
        }
    }

    fn cancelled(&mut self, cx: &mut TickContext<'_>) {
        self.release_cancelled(cx);
    }
}

struct PasteTimeout {
    key: String,
    serial: u64,
    ticks: u64,
    sessions: Sessions,
}

impl Task for PasteTimeout {
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus {
        let Some(e) = take_session(&self.sessions, &self.key, self.serial) else {
            return TaskStatus::Done;
        };
        let err = VaultError::Timeout(format!(
            "paste session '{}' exceeded {} ticks",
            self.key, self.ticks
        ));
        if e.promise.fail(err.clone()) {
            set_status(&e.status, PasteState::Failed(err), None);
            metrics::record_paste_failed();
            log::warn!("paste: session '{}' timed out after {} ticks", self.key, self.ticks);
        }
        e.token.cancel();
        cx.cancel(e.job_id);
        TaskStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CellState;
    use crate::snapshot::Vec3;
    use crate::world::{MemoryHost, MemoryWorld};

    fn engine(cfg: &VaultConfig) -> PasteEngine {
        PasteEngine::with_defaults(cfg).unwrap()
    }

    fn slab(w: i32, l: i32) -> Arc<Clipboard> {
        let mut c = Clipboard::new((w as u32, 1, l as u32));
        for x in 0..w {
            for z in 0..l {
                c.push_cell(ClipCell::new(Pos::new(x, 0, z), CellState::new("stone")));
            }
        }
        Arc::new(c)
    }

    fn target() -> Location {
        Location::new("w", Vec3::new(0.0, 64.0, 0.0))
    }

    #[test]
    fn instant_paste_resolves_in_one_step() {
        let cfg = VaultConfig::default();
        let eng = engine(&cfg);
        let mut host = MemoryHost::new().with_world(MemoryWorld::new("w"));
        let mut sched = Scheduler::new();
        let req = PasteRequest::new(
            "s",
            ClipboardSource::InMemory(slab(3, 3)),
            target(),
            PasteMode::Instant,
        );
        let h = eng.begin(&mut sched, req).unwrap();
        sched.run_until_idle(&mut host, 10);
        let loc = h.promise().outcome().unwrap().unwrap();
        assert_eq!(loc.pos, Vec3::new(0.5, 65.0, 0.5));
        assert_eq!(host.world("w").unwrap().cell_count(), 9);
        assert_eq!(h.state(), PasteState::Completed);
        assert!(!eng.is_active("s"));
    }

    #[test]
    fn second_session_with_same_key_is_busy() {
        let cfg = VaultConfig::default();
        let eng = engine(&cfg);
        let mut sched = Scheduler::new();
        let req = PasteRequest::new(
            "s",
            ClipboardSource::InMemory(slab(2, 2)),
            target(),
            PasteMode::Animated,
        );
        eng.begin(&mut sched, req.clone()).unwrap();
        assert!(matches!(eng.begin(&mut sched, req), Err(VaultError::Busy(_))));
        assert_eq!(eng.state("s"), PasteState::Preparing);
        assert_eq!(eng.state("other"), PasteState::Idle);
    }

    #[test]
    fn missing_world_fails_the_session() {
        let cfg = VaultConfig::default();
        let eng = engine(&cfg);
        let mut host = MemoryHost::new();
        let mut sched = Scheduler::new();
        let req = PasteRequest::new(
            "s",
            ClipboardSource::InMemory(slab(2, 2)),
            target(),
            PasteMode::Instant,
        );
        let h = eng.begin(&mut sched, req).unwrap();
        sched.run_until_idle(&mut host, 10);
        assert_eq!(
            h.promise().outcome(),
            Some(Err(VaultError::MissingWorld("w".into())))
        );
        assert_eq!(sched.active_count(), 0);
    }
}
