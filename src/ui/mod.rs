//! Mensajes enriquecidos que el bot publica en el canal de texto.

pub mod embeds;
