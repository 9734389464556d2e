//! # Controlador de reproducción
//!
//! Una máquina de estados por contexto que vacía su cola a través del
//! transcodificador y gestiona la conexión de voz.
//!
//! ## Estados
//!
//! ```text
//! Idle ──enqueue──▶ Running ──cola vacía──▶ InactiveWait ──timer──▶ Terminated
//!                     ▲                          │
//!                     └────────enqueue───────────┘
//! ```
//!
//! `leave`, una desconexión externa o un error fuera del bucle llevan a
//! `Terminating` y luego a `Terminated` desde cualquier estado.
//!
//! ## Señales
//!
//! - `runner`: vida de la tarea de reproducción
//! - `skip`: solo el track actual, hija de `runner`
//! - `inactivity`: despierta la espera cuando llega una canción
//!
//! `skip` e `inactivity` se reemplazan en cada iteración. El lock de estado
//! se toma siempre antes que el de la cola y ninguno cruza un `.await`.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::controls::PlaybackControls;
use crate::audio::queue::{QueueEntry, TrackQueue};
use crate::audio::transcode::{Outcome, Pacing, PcmSink, TranscodeEngine};
use crate::error::{ResolveError, SessionError};
use crate::sources::{ResolutionChain, Track};
use crate::voice::{ContextId, VoiceConnection, VoiceConnector, VoiceTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    InactiveWait,
    Terminating,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Left,
    Inactivity,
    Disconnected,
    Failed(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Left => f.write_str("salida solicitada"),
            TerminationReason::Inactivity => f.write_str("inactividad"),
            TerminationReason::Disconnected => f.write_str("desconexión del canal de voz"),
            TerminationReason::Failed(cause) => write!(f, "error: {}", cause),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    TrackStarted {
        context: ContextId,
        track: Arc<Track>,
    },
    TrackFailed {
        context: ContextId,
        track: Arc<Track>,
        cause: String,
    },
    QueueFinished {
        context: ContextId,
    },
    Terminated {
        context: ContextId,
        reason: TerminationReason,
    },
}

impl SessionEvent {
    pub fn context(&self) -> ContextId {
        match self {
            SessionEvent::TrackStarted { context, .. }
            | SessionEvent::TrackFailed { context, .. }
            | SessionEvent::QueueFinished { context }
            | SessionEvent::Terminated { context, .. } => *context,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub inactivity_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub default_volume: f32,
    pub pacing: Pacing,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(10),
            default_volume: 0.5,
            pacing: Pacing::RealTime,
        }
    }
}

/// Foto del estado de una sesión.
#[derive(Debug, Clone)]
pub struct PlaybackStatus {
    pub phase: SessionPhase,
    pub current: Option<Arc<Track>>,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub looping: bool,
    pub volume: f32,
    pub queued: usize,
}

struct SessionState {
    phase: SessionPhase,
    runner: CancellationToken,
    skip: CancellationToken,
    inactivity: CancellationToken,
    task: Option<JoinHandle<()>>,
    connection: Option<Arc<dyn VoiceConnection>>,
    now_playing: Option<QueueEntry>,
    termination: Option<TerminationReason>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            runner: CancellationToken::new(),
            skip: CancellationToken::new(),
            inactivity: CancellationToken::new(),
            task: None,
            connection: None,
            now_playing: None,
            termination: None,
        }
    }

    fn cancel_all(&self) {
        self.runner.cancel();
        self.skip.cancel();
        self.inactivity.cancel();
    }
}

enum TrackOutcome {
    Played(Outcome),
    Failed(String),
}

pub struct PlaybackController {
    target: VoiceTarget,
    chain: Arc<ResolutionChain>,
    voice: Arc<dyn VoiceConnector>,
    engine: TranscodeEngine,
    settings: ControllerSettings,
    controls: Arc<PlaybackControls>,
    state: Mutex<SessionState>,
    queue: Mutex<TrackQueue>,
    events: mpsc::UnboundedSender<SessionEvent>,
    finished: AtomicBool,
}

impl PlaybackController {
    pub fn new(
        target: VoiceTarget,
        chain: Arc<ResolutionChain>,
        voice: Arc<dyn VoiceConnector>,
        settings: ControllerSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            chain,
            voice,
            engine: TranscodeEngine::new(settings.pacing),
            controls: Arc::new(PlaybackControls::new(settings.default_volume)),
            settings,
            state: Mutex::new(SessionState::new()),
            queue: Mutex::new(TrackQueue::new()),
            events,
            finished: AtomicBool::new(false),
        })
    }

    pub fn target(&self) -> VoiceTarget {
        self.target
    }

    fn context(&self) -> ContextId {
        self.target.context
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// La sesión ya no acepta canciones.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Terminating | SessionPhase::Terminated
        )
    }

    /// Resuelve `query` y encola el resultado; arranca la reproducción si hace falta.
    pub async fn enqueue(
        self: &Arc<Self>,
        query: &str,
        insert_next: bool,
    ) -> Result<Vec<Arc<Track>>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }

        let tracks = self.chain.resolve(query).await?;
        if tracks.is_empty() {
            return Err(ResolveError::NotFound {
                query: query.trim().to_string(),
            }
            .into());
        }

        self.admit(tracks.clone(), insert_next)?;
        Ok(tracks)
    }

    fn admit(self: &Arc<Self>, tracks: Vec<Arc<Track>>, insert_next: bool) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if matches!(
            state.phase,
            SessionPhase::Terminating | SessionPhase::Terminated
        ) {
            return Err(SessionError::SessionClosed);
        }

        {
            let mut queue = self.queue.lock();
            if tracks.len() == 1 {
                queue.add(tracks[0].clone(), insert_next);
            } else {
                queue.add_many(tracks, insert_next);
            }
        }
        state.inactivity.cancel();

        if state.task.is_none() {
            let runner = CancellationToken::new();
            state.runner = runner.clone();
            state.phase = SessionPhase::Running;
            state.task = Some(tokio::spawn(self.clone().run(runner)));
            info!("🎵 Sesión iniciada para contexto {}", self.context());
        }
        Ok(())
    }

    /// Corta solo el track actual. `false` si no sonaba nada.
    pub fn skip(&self) -> bool {
        let state = self.state.lock();
        if state.now_playing.is_none() {
            return false;
        }
        state.skip.cancel();
        true
    }

    /// Vacía la cola y corta el track actual; la sesión sigue viva.
    pub fn stop(&self) {
        let state = self.state.lock();
        self.queue.lock().clear();
        state.skip.cancel();
        info!("⏹️ Reproducción detenida en contexto {}", self.context());
    }

    pub fn toggle_looping(&self) -> bool {
        let looping = self.controls.toggle_looping();
        info!("🔂 Repetición {}", if looping { "activada" } else { "desactivada" });
        looping
    }

    pub fn shuffle(&self) {
        self.queue.lock().shuffle();
    }

    /// Devuelve el volumen aplicado tras el límite 0.0–2.0.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let applied = self.controls.set_volume(volume);
        info!("🔊 Volumen: {:.0}%", applied * 100.0);
        applied
    }

    pub fn status(&self) -> PlaybackStatus {
        let state = self.state.lock();
        let queued = self.queue.lock().len();
        let current = state.now_playing.as_ref().map(|e| e.track.clone());
        let (position, duration) = match &current {
            Some(track) => (
                self.controls.position(),
                self.controls.duration().or(track.duration),
            ),
            None => (Duration::ZERO, None),
        };
        PlaybackStatus {
            phase: state.phase,
            current,
            position,
            duration,
            looping: self.controls.is_looping(),
            volume: self.controls.volume(),
            queued,
        }
    }

    /// Las siguientes `n` canciones, sin contar la que suena.
    pub fn upcoming(&self, n: usize) -> Vec<Arc<Track>> {
        let state = self.state.lock();
        let playing = state.now_playing.as_ref().map(|e| e.id);
        self.queue
            .lock()
            .iter()
            .filter(|e| Some(e.id) != playing)
            .take(n)
            .map(|e| e.track.clone())
            .collect()
    }

    /// Toda la cola en orden, cabeza primero.
    pub fn queued(&self) -> Vec<Arc<Track>> {
        self.queue.lock().iter().map(|e| e.track.clone()).collect()
    }

    pub async fn leave(&self) {
        self.shutdown(TerminationReason::Left).await;
    }

    /// Cancela todas las señales, espera a la tarea con límite y libera la voz.
    pub async fn shutdown(&self, reason: TerminationReason) {
        let task = {
            let mut state = self.state.lock();
            if state.phase == SessionPhase::Terminated {
                return;
            }
            state.termination.get_or_insert(reason.clone());
            state.phase = SessionPhase::Terminating;
            state.cancel_all();
            state.task.take()
        };
        self.queue.lock().clear();

        if let Some(mut handle) = task {
            let waited = tokio::time::timeout(self.settings.shutdown_timeout, &mut handle).await;
            if waited.is_err() {
                warn!(
                    "⚠️ La sesión {} no terminó en {:?}, se fuerza el cierre",
                    self.context(),
                    self.settings.shutdown_timeout
                );
                handle.abort();
            }
        }

        let reason = self.state.lock().termination.take().unwrap_or(reason);
        self.finish(reason).await;
    }

    /// Cierre final. Solo la primera llamada tiene efecto.
    async fn finish(&self, reason: TerminationReason) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let connection = {
            let mut state = self.state.lock();
            state.phase = SessionPhase::Terminated;
            state.cancel_all();
            state.now_playing = None;
            state.connection.take()
        };
        self.queue.lock().clear();

        if let Some(connection) = connection {
            connection.close().await;
        }
        info!("🛑 Sesión {} terminada: {}", self.context(), reason);
        self.emit(SessionEvent::Terminated {
            context: self.context(),
            reason,
        });
    }

    async fn run(self: Arc<Self>, runner: CancellationToken) {
        let reason = match self.run_session(&runner).await {
            Ok(()) => self
                .state
                .lock()
                .termination
                .take()
                .unwrap_or(TerminationReason::Left),
            Err(e) => {
                error!("💥 Sesión {} terminó por un error: {}", self.context(), e);
                TerminationReason::Failed(e.to_string())
            }
        };
        self.finish(reason).await;
    }

    async fn run_session(self: &Arc<Self>, runner: &CancellationToken) -> Result<(), SessionError> {
        let connection = self.voice.connect(self.target).await?;
        self.state.lock().connection = Some(connection.clone());
        if runner.is_cancelled() {
            return Ok(());
        }

        let mut sink = Some(connection.start().await?);
        self.watch_disconnect(connection.disconnected(), runner.clone());

        loop {
            self.drain_queue(&mut sink, runner).await?;
            if runner.is_cancelled() {
                return Ok(());
            }

            let Some(inactivity) = self.begin_inactive_wait() else {
                continue;
            };
            self.emit(SessionEvent::QueueFinished {
                context: self.context(),
            });
            info!(
                "⏳ Cola vacía en contexto {}, esperando {:?}",
                self.context(),
                self.settings.inactivity_timeout
            );

            tokio::select! {
                _ = runner.cancelled() => return Ok(()),
                _ = inactivity.cancelled() => {
                    debug!("▶️ Nueva canción, se reanuda la reproducción");
                }
                _ = tokio::time::sleep(self.settings.inactivity_timeout) => {
                    if self.expire_if_idle() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Token fresco de inactividad, o `None` si ya hay canciones en cola.
    fn begin_inactive_wait(&self) -> Option<CancellationToken> {
        let mut state = self.state.lock();
        if !self.queue.lock().is_empty() {
            return None;
        }
        state.now_playing = None;
        state.inactivity = CancellationToken::new();
        state.phase = SessionPhase::InactiveWait;
        Some(state.inactivity.clone())
    }

    fn expire_if_idle(&self) -> bool {
        let mut state = self.state.lock();
        if !self.queue.lock().is_empty() {
            return false;
        }
        info!("💤 Sesión {} inactiva", self.context());
        state.phase = SessionPhase::Terminating;
        state.termination.get_or_insert(TerminationReason::Inactivity);
        true
    }

    fn watch_disconnect(self: &Arc<Self>, disconnected: CancellationToken, runner: CancellationToken) {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = disconnected.cancelled() => {
                    warn!("🔌 Voz desconectada en contexto {}", controller.context());
                    controller.shutdown(TerminationReason::Disconnected).await;
                }
                _ = runner.cancelled() => {}
            }
        });
    }

    async fn drain_queue(
        &self,
        sink: &mut Option<Box<dyn PcmSink>>,
        runner: &CancellationToken,
    ) -> Result<(), SessionError> {
        loop {
            if runner.is_cancelled() {
                return Ok(());
            }
            let Some((entry, skip)) = self.next_entry(runner) else {
                return Ok(());
            };

            info!("▶️ Reproduciendo: {}", entry.track.display_name());
            self.emit(SessionEvent::TrackStarted {
                context: self.context(),
                track: entry.track.clone(),
            });

            match self.play_entry(&entry, sink, skip).await? {
                TrackOutcome::Played(Outcome::Finished) => {
                    debug!("✅ Terminó: {}", entry.track.title);
                }
                TrackOutcome::Played(Outcome::Cancelled) => {
                    info!("⏭️ Saltada: {}", entry.track.title);
                }
                TrackOutcome::Failed(cause) => {
                    warn!("❌ Falló {}: {}", entry.track.title, cause);
                    self.emit(SessionEvent::TrackFailed {
                        context: self.context(),
                        track: entry.track.clone(),
                        cause,
                    });
                }
            }
            self.finish_entry(&entry);
        }
    }

    fn next_entry(&self, runner: &CancellationToken) -> Option<(QueueEntry, CancellationToken)> {
        let mut state = self.state.lock();
        let entry = self.queue.lock().current().cloned()?;
        state.skip = runner.child_token();
        state.phase = SessionPhase::Running;
        state.now_playing = Some(entry.clone());
        Some((entry, state.skip.clone()))
    }

    /// Quita la entrada reproducida, no la cabeza actual: un "play next"
    /// durante la canción no debe perderse.
    fn finish_entry(&self, entry: &QueueEntry) {
        let mut state = self.state.lock();
        state.now_playing = None;
        self.queue.lock().remove(entry.id);
    }

    async fn play_entry(
        &self,
        entry: &QueueEntry,
        sink: &mut Option<Box<dyn PcmSink>>,
        skip: CancellationToken,
    ) -> Result<TrackOutcome, SessionError> {
        let input = match self.chain.get_stream(&entry.track).await {
            Ok(input) => input,
            Err(e) => return Ok(TrackOutcome::Failed(e.to_string())),
        };
        let Some(mut out) = sink.take() else {
            return Err(SessionError::Task("sin salida de audio".to_string()));
        };

        let engine = self.engine.clone();
        let controls = self.controls.clone();
        let (out, result) = tokio::task::spawn_blocking(move || {
            let result = engine.run(input, out.as_mut(), &skip, &controls);
            (out, result)
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?;
        *sink = Some(out);

        Ok(match result {
            Ok(outcome) => TrackOutcome::Played(outcome),
            Err(e) => TrackOutcome::Failed(e.user_message()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::transcode::tests::tone_wav;
    use crate::audio::transcode::MediaInput;
    use crate::sources::{MediaResolver, ResolverRegistration, SourceKind};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    /// Resuelve cada nombre a un clip en memoria.
    pub(crate) struct ClipResolver {
        clips: HashMap<String, Vec<u8>>,
    }

    impl ClipResolver {
        pub(crate) fn new(clips: &[(&str, Vec<u8>)]) -> Self {
            Self {
                clips: clips
                    .iter()
                    .map(|(name, bytes)| (name.to_string(), bytes.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl MediaResolver for ClipResolver {
        fn name(&self) -> &'static str {
            "clips"
        }

        fn can_resolve(&self, _query: &str) -> bool {
            true
        }

        async fn resolve(&self, query: &str) -> anyhow::Result<Vec<Track>> {
            Ok(self
                .clips
                .contains_key(query)
                .then(|| Track::new(query, query, query, SourceKind::Direct))
                .into_iter()
                .collect())
        }

        fn can_get_stream(&self, _track: &Track) -> bool {
            true
        }

        async fn get_stream(&self, track: &Track) -> anyhow::Result<Box<dyn MediaInput>> {
            let bytes = self
                .clips
                .get(&track.url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("sin clip"))?;
            Ok(Box::new(Cursor::new(bytes)))
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeConnection {
        pub(crate) closed: AtomicBool,
        pub(crate) disconnected: CancellationToken,
    }

    #[async_trait]
    impl VoiceConnection for FakeConnection {
        async fn start(&self) -> Result<Box<dyn PcmSink>, SessionError> {
            Ok(Box::new(std::io::sink()))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn disconnected(&self) -> CancellationToken {
            self.disconnected.clone()
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub(crate) connects: AtomicUsize,
        pub(crate) connection: Arc<FakeConnection>,
    }

    #[async_trait]
    impl VoiceConnector for FakeConnector {
        async fn connect(&self, _target: VoiceTarget) -> Result<Arc<dyn VoiceConnection>, SessionError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.connection.clone())
        }
    }

    pub(crate) fn clip_chain(clips: &[(&str, Vec<u8>)]) -> Arc<ResolutionChain> {
        Arc::new(ResolutionChain::new(10).register(
            Arc::new(ClipResolver::new(clips)),
            ResolverRegistration::new("clips", 0, true),
        ))
    }

    pub(crate) fn test_settings() -> ControllerSettings {
        ControllerSettings {
            inactivity_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(2),
            default_volume: 0.5,
            pacing: Pacing::RealTime,
        }
    }

    struct Harness {
        controller: Arc<PlaybackController>,
        voice: Arc<FakeConnector>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new(clips: &[(&str, Vec<u8>)], settings: ControllerSettings) -> Self {
            let voice = Arc::new(FakeConnector::default());
            let (tx, events) = mpsc::unbounded_channel();
            let controller = PlaybackController::new(
                VoiceTarget::new(1, 2),
                clip_chain(clips),
                voice.clone(),
                settings,
                tx,
            );
            Self {
                controller,
                voice,
                events,
            }
        }

        async fn next_event(&mut self) -> SessionEvent {
            tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("no llegó ningún evento")
                .expect("canal de eventos cerrado")
        }

        async fn next_started(&mut self) -> String {
            loop {
                if let SessionEvent::TrackStarted { track, .. } = self.next_event().await {
                    return track.title.clone();
                }
            }
        }

        fn queued_titles(&self) -> Vec<String> {
            self.controller
                .queued()
                .iter()
                .map(|t| t.title.clone())
                .collect()
        }
    }

    fn long_clip() -> Vec<u8> {
        tone_wav(48_000, 5_000)
    }

    fn short_clip() -> Vec<u8> {
        tone_wav(48_000, 40)
    }

    #[tokio::test]
    async fn test_skip_advances_to_second_track() {
        let mut h = Harness::new(&[("a", long_clip()), ("b", long_clip())], test_settings());
        h.controller.enqueue("a", false).await.unwrap();
        h.controller.enqueue("b", false).await.unwrap();

        assert_eq!(h.next_started().await, "a");
        assert!(h.controller.skip());
        assert_eq!(h.next_started().await, "b");

        let status = h.controller.status();
        assert_eq!(status.current.map(|t| t.title.clone()), Some("b".to_string()));
        assert_eq!(h.queued_titles(), vec!["b"]);
        h.controller.leave().await;
    }

    #[tokio::test]
    async fn test_insert_next_on_single_entry_queue() {
        let mut h = Harness::new(&[("a", long_clip()), ("b", long_clip())], test_settings());
        h.controller.enqueue("a", false).await.unwrap();
        assert_eq!(h.next_started().await, "a");

        h.controller.enqueue("b", true).await.unwrap();
        assert_eq!(h.queued_titles(), vec!["b", "a"]);
        let upcoming: Vec<String> = h.controller.upcoming(5).iter().map(|t| t.title.clone()).collect();
        assert_eq!(upcoming, vec!["b"]);

        // Al terminar "a" se quita "a", no la nueva cabeza.
        h.controller.skip();
        assert_eq!(h.next_started().await, "b");
        assert_eq!(h.queued_titles(), vec!["b"]);
        h.controller.leave().await;
    }

    #[tokio::test]
    async fn test_stop_keeps_session_alive() {
        let mut h = Harness::new(
            &[("a", long_clip()), ("b", long_clip()), ("c", long_clip()), ("d", short_clip())],
            test_settings(),
        );
        for name in ["a", "b", "c"] {
            h.controller.enqueue(name, false).await.unwrap();
        }
        assert_eq!(h.next_started().await, "a");

        h.controller.stop();
        assert!(h.queued_titles().is_empty());
        assert!(matches!(h.next_event().await, SessionEvent::QueueFinished { .. }));
        assert_eq!(h.controller.phase(), SessionPhase::InactiveWait);

        h.controller.enqueue("d", false).await.unwrap();
        assert_eq!(h.next_started().await, "d");
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 1);
        assert!(!h.controller.is_closed());
        h.controller.leave().await;
    }

    #[tokio::test]
    async fn test_leave_terminates_session() {
        let mut h = Harness::new(&[("a", long_clip())], test_settings());
        h.controller.enqueue("a", false).await.unwrap();
        assert_eq!(h.next_started().await, "a");

        h.controller.leave().await;
        match h.next_event().await {
            SessionEvent::Terminated { reason, .. } => assert_eq!(reason, TerminationReason::Left),
            other => panic!("evento inesperado: {:?}", other),
        }
        assert!(h.voice.connection.closed.load(Ordering::SeqCst));
        assert_eq!(h.controller.phase(), SessionPhase::Terminated);
        assert!(matches!(
            h.controller.enqueue("a", false).await,
            Err(SessionError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_inactivity_timeout_terminates() {
        let settings = ControllerSettings {
            inactivity_timeout: Duration::from_millis(150),
            ..test_settings()
        };
        let mut h = Harness::new(&[("a", short_clip())], settings);
        h.controller.enqueue("a", false).await.unwrap();

        assert_eq!(h.next_started().await, "a");
        assert!(matches!(h.next_event().await, SessionEvent::QueueFinished { .. }));
        match h.next_event().await {
            SessionEvent::Terminated { reason, .. } => {
                assert_eq!(reason, TerminationReason::Inactivity)
            }
            other => panic!("evento inesperado: {:?}", other),
        }
        assert!(h.voice.connection.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_track_does_not_stop_session() {
        let mut h = Harness::new(
            &[("bad", b"esto no es audio".to_vec()), ("good", short_clip())],
            test_settings(),
        );
        h.controller.enqueue("bad", false).await.unwrap();
        h.controller.enqueue("good", false).await.unwrap();

        assert_eq!(h.next_started().await, "bad");
        match h.next_event().await {
            SessionEvent::TrackFailed { track, cause, .. } => {
                assert_eq!(track.title, "bad");
                assert!(!cause.is_empty());
            }
            other => panic!("evento inesperado: {:?}", other),
        }
        assert_eq!(h.next_started().await, "good");
        h.controller.leave().await;
    }

    #[tokio::test]
    async fn test_not_found_does_not_start_session() {
        let h = Harness::new(&[], test_settings());
        let err = h.controller.enqueue("nada", false).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Resolve(ResolveError::NotFound { .. })
        ));
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_voice_disconnect_terminates() {
        let mut h = Harness::new(&[("a", long_clip())], test_settings());
        h.controller.enqueue("a", false).await.unwrap();
        assert_eq!(h.next_started().await, "a");

        h.voice.connection.disconnected.cancel();
        match h.next_event().await {
            SessionEvent::Terminated { reason, .. } => {
                assert_eq!(reason, TerminationReason::Disconnected)
            }
            other => panic!("evento inesperado: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_controls_are_exposed() {
        let h = Harness::new(&[], test_settings());
        assert!(h.controller.toggle_looping());
        assert_eq!(h.controller.set_volume(3.0), 2.0);
        let status = h.controller.status();
        assert!(status.looping);
        assert_eq!(status.volume, 2.0);
        assert!(status.current.is_none());
        assert_eq!(status.queued, 0);
    }
}
