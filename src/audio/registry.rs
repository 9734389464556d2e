//! Registro de sesiones: un controlador por contexto, creado al primer uso.
//!
//! Los controladores publican sus eventos en un canal interno. Una tarea
//! lo consume, retira las sesiones terminadas y reenvía cada evento hacia
//! fuera (el bot).

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::player::{ControllerSettings, PlaybackController, SessionEvent};
use crate::error::SessionError;
use crate::sources::{ResolutionChain, Track};
use crate::voice::{ContextId, VoiceConnector, VoiceTarget};

pub struct SessionRegistry {
    sessions: Arc<DashMap<ContextId, Arc<PlaybackController>>>,
    chain: Arc<ResolutionChain>,
    voice: Arc<dyn VoiceConnector>,
    settings: ControllerSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionRegistry {
    /// Debe llamarse dentro del runtime: lanza la tarea de eventos.
    pub fn new(
        chain: Arc<ResolutionChain>,
        voice: Arc<dyn VoiceConnector>,
        settings: ControllerSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, mut inbox) = mpsc::unbounded_channel::<SessionEvent>();
        let (outbox, outward) = mpsc::unbounded_channel();
        let sessions: Arc<DashMap<ContextId, Arc<PlaybackController>>> = Arc::new(DashMap::new());

        let pump_sessions = sessions.clone();
        tokio::spawn(async move {
            while let Some(event) = inbox.recv().await {
                if let SessionEvent::Terminated { context, .. } = &event {
                    if pump_sessions
                        .remove_if(context, |_, c| c.is_closed())
                        .is_some()
                    {
                        debug!("🧹 Sesión {} retirada del registro", context);
                    }
                }
                let _ = outbox.send(event);
            }
        });

        let registry = Arc::new(Self {
            sessions,
            chain,
            voice,
            settings,
            events,
        });
        (registry, outward)
    }

    fn get_or_create(&self, target: VoiceTarget) -> Arc<PlaybackController> {
        let mut entry = self.sessions.entry(target.context).or_insert_with(|| {
            info!("🆕 Nueva sesión para contexto {}", target.context);
            self.spawn_controller(target)
        });
        if entry.is_closed() {
            *entry = self.spawn_controller(target);
        }
        entry.clone()
    }

    fn spawn_controller(&self, target: VoiceTarget) -> Arc<PlaybackController> {
        PlaybackController::new(
            target,
            self.chain.clone(),
            self.voice.clone(),
            self.settings.clone(),
            self.events.clone(),
        )
    }

    pub fn get(&self, context: ContextId) -> Option<Arc<PlaybackController>> {
        self.sessions.get(&context).map(|c| c.clone())
    }

    /// Encola en la sesión del contexto, creándola si no existe.
    ///
    /// Si la sesión terminó justo entre la búsqueda y el encolado, se
    /// reemplaza y se reintenta una vez.
    pub async fn enqueue(
        &self,
        target: VoiceTarget,
        query: &str,
        insert_next: bool,
    ) -> Result<Vec<Arc<Track>>, SessionError> {
        let controller = self.get_or_create(target);
        match controller.enqueue(query, insert_next).await {
            Err(SessionError::SessionClosed) => {
                self.sessions
                    .remove_if(&target.context, |_, c| Arc::ptr_eq(c, &controller));
                self.get_or_create(target).enqueue(query, insert_next).await
            }
            other => other,
        }
    }

    /// `false` si el contexto no tenía sesión.
    pub async fn leave(&self, context: ContextId) -> bool {
        let Some(controller) = self.get(context) else {
            return false;
        };
        controller.leave().await;
        self.sessions
            .remove_if(&context, |_, c| Arc::ptr_eq(c, &controller));
        true
    }

    pub async fn shutdown_all(&self) {
        let controllers: Vec<Arc<PlaybackController>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        info!("🛑 Cerrando {} sesiones", controllers.len());
        for controller in controllers {
            controller.leave().await;
        }
        self.sessions.clear();
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::tests::{clip_chain, test_settings, FakeConnector};
    use crate::audio::player::TerminationReason;
    use crate::audio::transcode::tests::tone_wav;
    use std::time::Duration;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no llegó ningún evento")
            .expect("canal cerrado")
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let chain = clip_chain(&[("a", tone_wav(48_000, 5_000))]);
        let (registry, mut events) =
            SessionRegistry::new(chain, Arc::new(FakeConnector::default()), test_settings());

        registry.enqueue(VoiceTarget::new(1, 10), "a", false).await.unwrap();
        registry.enqueue(VoiceTarget::new(2, 20), "a", false).await.unwrap();
        assert_eq!(registry.active_sessions(), 2);

        let one = registry.get(1).unwrap();
        let two = registry.get(2).unwrap();
        assert!(!Arc::ptr_eq(&one, &two));
        assert_eq!(one.target().channel, 10);

        let mut started = Vec::new();
        while started.len() < 2 {
            if let SessionEvent::TrackStarted { context, .. } = next_event(&mut events).await {
                started.push(context);
            }
        }
        started.sort();
        assert_eq!(started, vec![1, 2]);

        registry.shutdown_all().await;
        assert_eq!(registry.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_terminated_session_is_replaced() {
        let chain = clip_chain(&[("a", tone_wav(48_000, 5_000))]);
        let voice = Arc::new(FakeConnector::default());
        let (registry, mut events) = SessionRegistry::new(chain, voice.clone(), test_settings());
        let target = VoiceTarget::new(7, 1);

        registry.enqueue(target, "a", false).await.unwrap();
        let first = registry.get(7).unwrap();
        assert!(registry.leave(7).await);
        assert!(!registry.leave(7).await);

        loop {
            if let SessionEvent::Terminated { reason, context } = next_event(&mut events).await {
                assert_eq!(context, 7);
                assert_eq!(reason, TerminationReason::Left);
                break;
            }
        }
        assert!(registry.get(7).is_none());

        registry.enqueue(target, "a", false).await.unwrap();
        let second = registry.get(7).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        registry.shutdown_all().await;
    }
}
