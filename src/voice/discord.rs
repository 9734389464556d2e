//! Voz de Discord con songbird.
//!
//! Cada sesión reproduce una única entrada "raw" de songbird durante toda
//! su vida. El motor escribe s16le en un canal y songbird lee f32 del otro
//! extremo; si el canal está vacío se entrega silencio.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::{Input, RawAdapter};
use songbird::tracks::TrackHandle;
use songbird::{Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::io::MediaSource;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{VoiceConnection, VoiceConnector, VoiceTarget};
use crate::audio::transcode::{PcmSink, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
use crate::error::SessionError;

/// Bloques en vuelo entre el motor y songbird.
const CHANNEL_CAPACITY: usize = 32;
/// Si songbird deja de leer, el bloque se descarta tras este tiempo.
const SEND_TIMEOUT: Duration = Duration::from_millis(200);
/// 20 ms de silencio en f32 estéreo.
const SILENCE_BYTES: usize = (TARGET_SAMPLE_RATE as usize / 50) * TARGET_CHANNELS * 4;

/// Extremo de escritura: convierte s16le a f32le.
struct ChannelSink {
    tx: flume::Sender<Vec<u8>>,
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let usable = buf.len() - buf.len() % 2;
        if usable == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "bloque PCM incompleto",
            ));
        }

        let mut converted = Vec::with_capacity(usable * 2);
        for sample in buf[..usable].chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]) as f32 / 32768.0;
            converted.extend_from_slice(&value.to_le_bytes());
        }

        match self.tx.send_timeout(converted, SEND_TIMEOUT) {
            Ok(()) => Ok(usable),
            Err(flume::SendTimeoutError::Timeout(_)) => {
                debug!("⏳ songbird no consume audio, bloque descartado");
                Ok(usable)
            }
            Err(flume::SendTimeoutError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "la conexión de voz se cerró",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Extremo de lectura que songbird consume como fuente sin seek.
struct ChannelSource {
    rx: flume::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ChannelSource {
    fn new(rx: flume::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for ChannelSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.pending.len() {
            // Los bloques siempre son frames completos: el silencio no desalinea canales.
            self.pending = match self.rx.try_recv() {
                Ok(chunk) => chunk,
                Err(flume::TryRecvError::Empty) => vec![0u8; SILENCE_BYTES],
                Err(flume::TryRecvError::Disconnected) => return Ok(0),
            };
            self.offset = 0;
        }

        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl Seek for ChannelSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream en vivo sin seek",
        ))
    }
}

impl MediaSource for ChannelSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

struct DriverDisconnectHandler {
    disconnected: CancellationToken,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        warn!("🔌 Driver de voz desconectado");
        self.disconnected.cancel();
        None
    }
}

pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(&self, target: VoiceTarget) -> Result<Arc<dyn VoiceConnection>, SessionError> {
        let guild = GuildId::new(target.context);
        let channel = ChannelId::new(target.channel);
        info!("🔗 Conectando al canal {} en guild {}", channel, guild);

        let call = self
            .manager
            .join(guild, channel)
            .await
            .map_err(|e| SessionError::Voice(format!("{:?}", e)))?;

        let disconnected = CancellationToken::new();
        call.lock().await.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DriverDisconnectHandler {
                disconnected: disconnected.clone(),
            },
        );

        info!("✅ Conectado al canal {} en guild {}", channel, guild);
        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild,
            call,
            track: parking_lot::Mutex::new(None),
            disconnected,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild: GuildId,
    call: Arc<Mutex<Call>>,
    track: parking_lot::Mutex<Option<TrackHandle>>,
    disconnected: CancellationToken,
    closed: AtomicBool,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn start(&self) -> Result<Box<dyn PcmSink>, SessionError> {
        let (tx, rx) = flume::bounded(CHANNEL_CAPACITY);
        let adapter = RawAdapter::new(
            ChannelSource::new(rx),
            TARGET_SAMPLE_RATE,
            TARGET_CHANNELS as u32,
        );
        let handle = self.call.lock().await.play_input(Input::from(adapter));
        *self.track.lock() = Some(handle);
        debug!("🎵 Entrada PCM abierta en guild {}", self.guild);
        Ok(Box::new(ChannelSink { tx }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.track.lock().take() {
            let _ = handle.stop();
        }
        if let Err(e) = self.manager.remove(self.guild).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {:?}", self.guild, e);
        }
        info!("👋 Desconectado de guild {}", self.guild);
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }
}
