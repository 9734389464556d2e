//! # Open Music Stream
//!
//! Núcleo de streaming de música por canal: cadena de resolución de
//! fuentes, transcodificador a PCM y controlador de reproducción con una
//! sesión por contexto. El binario lo conecta a Discord con serenity y
//! songbird.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
pub mod voice;
