//! # Bot Module
//!
//! Capa fina sobre serenity: interpreta comandos de texto con prefijo,
//! los traduce a llamadas sobre el [`SessionRegistry`] y publica los
//! eventos de cada sesión en el canal de texto desde el que se inició.
//!
//! El contexto de reproducción es el guild: una sesión por servidor.

pub mod commands;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId},
    async_trait,
    builder::{CreateEmbed, CreateMessage},
    http::Http,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    audio::{PlaybackController, SessionEvent, SessionRegistry},
    error::{ResolveError, SessionError},
    ui::embeds,
    voice::{ContextId, VoiceTarget},
};
use commands::Command;

type TextChannels = Arc<DashMap<ContextId, ChannelId>>;

pub struct MusicBot {
    registry: Arc<SessionRegistry>,
    prefix: String,
    text_channels: TextChannels,
}

impl MusicBot {
    pub fn new(registry: Arc<SessionRegistry>, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
            text_channels: Arc::new(DashMap::new()),
        }
    }

    /// Publicador de eventos que comparte con el bot el mapa de canales.
    pub fn event_forwarder(&self, inactivity_timeout: Duration) -> EventForwarder {
        EventForwarder {
            text_channels: self.text_channels.clone(),
            inactivity_timeout,
        }
    }

    async fn execute(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        command: Command,
    ) -> CreateEmbed {
        let context = guild_id.get();
        match command {
            Command::Play(query) => self.play(ctx, msg, guild_id, &query, false).await,
            Command::PlayNext(query) => self.play(ctx, msg, guild_id, &query, true).await,
            Command::Leave => {
                if self.registry.leave(context).await {
                    embeds::create_success_embed("Desconectado", "Salí del canal de voz")
                } else {
                    not_connected()
                }
            }
            Command::Help => {
                embeds::create_info_embed("Comandos", &commands::help_text(&self.prefix))
            }
            Command::Skip => self.with_session(context, |c| {
                if c.skip() {
                    embeds::create_success_embed("Saltada", "⏭️ Pasando a la siguiente")
                } else {
                    embeds::create_info_embed("Nada que saltar", "No hay nada sonando")
                }
            }),
            Command::Stop => self.with_session(context, |c| {
                c.stop();
                embeds::create_success_embed("Detenido", "⏹️ Cola vaciada")
            }),
            Command::Loop => self.with_session(context, |c| {
                let state = if c.toggle_looping() {
                    "🔂 Repetición activada"
                } else {
                    "➡️ Repetición desactivada"
                };
                embeds::create_success_embed("Repetición", state)
            }),
            Command::Shuffle => self.with_session(context, |c| {
                c.shuffle();
                embeds::create_success_embed("Mezclada", "🔀 Cola mezclada")
            }),
            Command::Volume(volume) => self.with_session(context, |c| {
                let applied = c.set_volume(volume);
                embeds::create_success_embed("Volumen", &format!("🔊 {}%", (applied * 100.0).round()))
            }),
            Command::Status => self.with_session(context, |c| embeds::create_status_embed(&c.status())),
            Command::Queue => self.with_session(context, |c| {
                let status = c.status();
                let total = status
                    .queued
                    .saturating_sub(usize::from(status.current.is_some()));
                embeds::create_queue_embed(&c.upcoming(embeds::QUEUE_PAGE), total)
            }),
        }
    }

    fn with_session(
        &self,
        context: ContextId,
        f: impl FnOnce(&PlaybackController) -> CreateEmbed,
    ) -> CreateEmbed {
        match self.registry.get(context) {
            Some(controller) => f(&controller),
            None => not_connected(),
        }
    }

    async fn play(
        &self,
        ctx: &Context,
        msg: &Message,
        guild_id: GuildId,
        query: &str,
        insert_next: bool,
    ) -> CreateEmbed {
        let channel_id = match get_user_voice_channel(ctx, guild_id, msg.author.id) {
            Ok(channel_id) => channel_id,
            Err(e) => return embeds::create_error_embed("Sin canal de voz", &e.to_string()),
        };

        let context = guild_id.get();
        self.text_channels.insert(context, msg.channel_id);
        let target = VoiceTarget::new(context, channel_id.get());

        match self.registry.enqueue(target, query, insert_next).await {
            Ok(tracks) => {
                info!(
                    "➕ {} track(s) agregados en guild {} por {}",
                    tracks.len(),
                    guild_id,
                    msg.author.name
                );
                embeds::create_tracks_added_embed(&tracks, insert_next)
            }
            Err(SessionError::Resolve(e @ ResolveError::NotFound { .. })) => {
                debug!("Sin resultados en guild {}: {}", guild_id, e);
                embeds::create_info_embed("Sin resultados", &e.to_string())
            }
            Err(e) => {
                warn!("❌ No se pudo encolar `{}`: {}", query, e);
                embeds::create_error_embed("No se pudo agregar", &e.to_string())
            }
        }
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
        info!("⌨️ Prefijo de comandos: {}", self.prefix);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(parsed) = commands::parse(&msg.content, &self.prefix) else {
            return;
        };

        let reply = match parsed {
            Ok(command) => {
                debug!("Comando {:?} en guild {}", command, guild_id);
                self.execute(&ctx, &msg, guild_id, command).await
            }
            Err(e) => embeds::create_error_embed("Comando inválido", &e.to_string()),
        };

        if let Err(e) = msg
            .channel_id
            .send_message(&ctx.http, CreateMessage::new().embed(reply))
            .await
        {
            warn!("No se pudo responder en {}: {}", msg.channel_id, e);
        }
    }
}

/// Publica los [`SessionEvent`] en el canal de texto de cada contexto.
pub struct EventForwarder {
    text_channels: TextChannels,
    inactivity_timeout: Duration,
}

impl EventForwarder {
    pub fn spawn(
        self,
        http: Arc<Http>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(channel) = self.route(&event) else {
                    debug!("Evento sin canal de texto para contexto {}", event.context());
                    continue;
                };

                let embed = self.render(&event);
                if let Err(e) = channel
                    .send_message(&http, CreateMessage::new().embed(embed))
                    .await
                {
                    warn!("No se pudo publicar evento en {}: {}", channel, e);
                }
            }
            debug!("Canal de eventos cerrado");
        })
    }

    /// Canal donde publicar `event`. Hay una entrada por guild, sobrescrita
    /// en cada `play`; `Terminated` no la borra, porque la sesión siguiente
    /// del mismo guild puede haberla registrado ya.
    fn route(&self, event: &SessionEvent) -> Option<ChannelId> {
        self.text_channels.get(&event.context()).map(|c| *c)
    }

    fn render(&self, event: &SessionEvent) -> CreateEmbed {
        match event {
            SessionEvent::TrackStarted { track, .. } => embeds::create_now_playing_embed(track),
            SessionEvent::TrackFailed { track, cause, .. } => {
                embeds::create_track_failed_embed(track, cause)
            }
            SessionEvent::QueueFinished { .. } => {
                embeds::create_queue_finished_embed(self.inactivity_timeout)
            }
            SessionEvent::Terminated { reason, .. } => embeds::create_terminated_embed(reason),
        }
    }
}

fn not_connected() -> CreateEmbed {
    embeds::create_info_embed("Sin sesión", "No estoy reproduciendo en este servidor")
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow!("Guild no encontrada en caché"))?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow!("Debes estar en un canal de voz"))
}
