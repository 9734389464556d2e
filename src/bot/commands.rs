//! Comandos de texto con prefijo.
//!
//! El parser es puro: recibe el contenido del mensaje y el prefijo y
//! devuelve un [`Command`]. La ejecución vive en [`super::MusicBot`].

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(String),
    PlayNext(String),
    Skip,
    Stop,
    Leave,
    Loop,
    Shuffle,
    /// Porcentaje ya convertido a multiplicador lineal (100% = 1.0).
    Volume(f32),
    Status,
    Queue,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingQuery(&'static str),
    InvalidVolume(String),
    Unknown(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingQuery(name) => {
                write!(f, "Uso: `{} <url o búsqueda>`", name)
            }
            ParseError::InvalidVolume(raw) => {
                write!(f, "Volumen inválido `{}`: usa un número entre 0 y 200", raw)
            }
            ParseError::Unknown(name) => write!(f, "Comando desconocido `{}`", name),
        }
    }
}

/// `None` si el mensaje no empieza con el prefijo.
pub fn parse(content: &str, prefix: &str) -> Option<Result<Command, ParseError>> {
    let body = content.trim().strip_prefix(prefix)?;
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    if name.is_empty() {
        return None;
    }

    let command = match name.to_lowercase().as_str() {
        "play" | "p" => query(rest, "play").map(Command::Play),
        "playnext" | "pn" => query(rest, "playnext").map(Command::PlayNext),
        "skip" | "s" => Ok(Command::Skip),
        "stop" => Ok(Command::Stop),
        "leave" | "dc" => Ok(Command::Leave),
        "loop" => Ok(Command::Loop),
        "shuffle" => Ok(Command::Shuffle),
        "volume" | "vol" => volume(rest),
        "status" | "np" => Ok(Command::Status),
        "queue" | "q" => Ok(Command::Queue),
        "help" => Ok(Command::Help),
        other => Err(ParseError::Unknown(other.to_string())),
    };
    Some(command)
}

fn query(rest: &str, name: &'static str) -> Result<String, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingQuery(name))
    } else {
        Ok(rest.to_string())
    }
}

fn volume(rest: &str) -> Result<Command, ParseError> {
    let raw = rest.trim_end_matches('%');
    match raw.parse::<f32>() {
        Ok(percent) if (0.0..=200.0).contains(&percent) => Ok(Command::Volume(percent / 100.0)),
        _ => Err(ParseError::InvalidVolume(rest.to_string())),
    }
}

pub fn help_text(prefix: &str) -> String {
    [
        ("play <url o búsqueda>", "Agrega al final de la cola"),
        ("playnext <url o búsqueda>", "Agrega al frente de la cola"),
        ("skip", "Salta la canción actual"),
        ("stop", "Detiene y vacía la cola"),
        ("leave", "Sale del canal de voz"),
        ("loop", "Activa o desactiva la repetición"),
        ("shuffle", "Mezcla la cola"),
        ("volume <0-200>", "Ajusta el volumen"),
        ("status", "Muestra la canción actual"),
        ("queue", "Muestra las próximas canciones"),
    ]
    .iter()
    .map(|(usage, what)| format!("`{}{}` - {}", prefix, usage, what))
    .collect::<Vec<_>>()
    .join("\n")
}
