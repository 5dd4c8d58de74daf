//! Extension pour intégrer PMORadio dans pmoconfig
//!
//! Ce module fournit le trait `RadioConfigExt` qui ajoute à
//! `pmoconfig::Config` les réglages des flux radio (section `radio`).
//!
//! # Exemple
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmoradio::RadioConfigExt;
//!
//! let config = get_config();
//! let options = config.get_radio_stream_options()?;
//! let program = config.get_radio_encoder_program()?;
//! ```

use std::time::Duration;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::stream::StreamOptions;
use crate::transcoder::DEFAULT_ENCODER_PROGRAM;

const BITRATE: &[&str] = &["radio", "bitrate"];
const BACKLOG_FRAMES: &[&str] = &["radio", "backlog_frames"];
const LOOKAHEAD_MS: &[&str] = &["radio", "lookahead_ms"];
const LISTENER_QUEUE: &[&str] = &["radio", "listener_queue"];
const MAX_START_FAILURES: &[&str] = &["radio", "max_start_failures"];
const ENCODER_PROGRAM: &[&str] = &["radio", "encoder", "program"];

/// Trait d'extension pour la configuration des flux radio
///
/// Les valeurs absentes ou mal typées retombent sur les valeurs par défaut
/// de [`StreamOptions`].
pub trait RadioConfigExt {
    /// Débit de sortie de l'encodeur, en bit/s (default: 128000)
    fn get_radio_bitrate(&self) -> Result<u32>;
    fn set_radio_bitrate(&self, bitrate: u32) -> Result<()>;

    /// Nombre de trames gardées pour les auditeurs qui arrivent (default: 500)
    fn get_radio_backlog_frames(&self) -> Result<usize>;
    fn set_radio_backlog_frames(&self, frames: usize) -> Result<()>;

    /// Avance maximale sur le temps réel, en millisecondes (default: 8000)
    fn get_radio_lookahead_ms(&self) -> Result<u64>;
    fn set_radio_lookahead_ms(&self, ms: u64) -> Result<()>;

    /// Taille de la file de chaque auditeur, en trames (default: 1000)
    fn get_radio_listener_queue(&self) -> Result<usize>;
    fn set_radio_listener_queue(&self, frames: usize) -> Result<()>;

    /// Échecs consécutifs avant abandon du flux (default: 5)
    fn get_radio_max_start_failures(&self) -> Result<u32>;
    fn set_radio_max_start_failures(&self, failures: u32) -> Result<()>;

    /// Programme d'encodage (default: `ffmpeg`)
    fn get_radio_encoder_program(&self) -> Result<String>;
    fn set_radio_encoder_program(&self, program: String) -> Result<()>;

    /// Assemble et valide les [`StreamOptions`] configurées
    fn get_radio_stream_options(&self) -> Result<StreamOptions>;
}

fn as_u64(value: Result<Value>) -> Option<u64> {
    match value {
        Ok(Value::Number(n)) => n.as_u64(),
        Ok(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RadioConfigExt for Config {
    fn get_radio_bitrate(&self) -> Result<u32> {
        Ok(as_u64(self.get_value(BITRATE))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(StreamOptions::default().bitrate))
    }

    fn set_radio_bitrate(&self, bitrate: u32) -> Result<()> {
        self.set_value(BITRATE, Value::Number(Number::from(bitrate)))
    }

    fn get_radio_backlog_frames(&self) -> Result<usize> {
        Ok(as_u64(self.get_value(BACKLOG_FRAMES))
            .map(|n| n as usize)
            .unwrap_or(StreamOptions::default().backlog_frames))
    }

    fn set_radio_backlog_frames(&self, frames: usize) -> Result<()> {
        self.set_value(BACKLOG_FRAMES, Value::Number(Number::from(frames)))
    }

    fn get_radio_lookahead_ms(&self) -> Result<u64> {
        Ok(as_u64(self.get_value(LOOKAHEAD_MS))
            .unwrap_or(StreamOptions::default().lookahead.as_millis() as u64))
    }

    fn set_radio_lookahead_ms(&self, ms: u64) -> Result<()> {
        self.set_value(LOOKAHEAD_MS, Value::Number(Number::from(ms)))
    }

    fn get_radio_listener_queue(&self) -> Result<usize> {
        Ok(as_u64(self.get_value(LISTENER_QUEUE))
            .map(|n| n as usize)
            .unwrap_or(StreamOptions::default().listener_queue))
    }

    fn set_radio_listener_queue(&self, frames: usize) -> Result<()> {
        self.set_value(LISTENER_QUEUE, Value::Number(Number::from(frames)))
    }

    fn get_radio_max_start_failures(&self) -> Result<u32> {
        Ok(as_u64(self.get_value(MAX_START_FAILURES))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(StreamOptions::default().max_start_failures))
    }

    fn set_radio_max_start_failures(&self, failures: u32) -> Result<()> {
        self.set_value(MAX_START_FAILURES, Value::Number(Number::from(failures)))
    }

    fn get_radio_encoder_program(&self) -> Result<String> {
        match self.get_value(ENCODER_PROGRAM) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            _ => Ok(DEFAULT_ENCODER_PROGRAM.to_string()),
        }
    }

    fn set_radio_encoder_program(&self, program: String) -> Result<()> {
        self.set_value(ENCODER_PROGRAM, Value::String(program))
    }

    fn get_radio_stream_options(&self) -> Result<StreamOptions> {
        let options = StreamOptions::default()
            .with_bitrate(self.get_radio_bitrate()?)
            .with_backlog_frames(self.get_radio_backlog_frames()?)
            .with_lookahead(Duration::from_millis(self.get_radio_lookahead_ms()?))
            .with_listener_queue(self.get_radio_listener_queue()?)
            .with_max_start_failures(self.get_radio_max_start_failures()?);
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_stream_defaults() {
        let config = Config::embedded();
        assert_eq!(config.get_radio_stream_options().unwrap(), StreamOptions::default());
        assert_eq!(config.get_radio_encoder_program().unwrap(), "ffmpeg");
    }

    #[test]
    fn test_setters_round_into_options() {
        let config = Config::embedded();
        config.set_radio_bitrate(192_000).unwrap();
        config.set_radio_lookahead_ms(2500).unwrap();
        config.set_radio_listener_queue(64).unwrap();

        let options = config.get_radio_stream_options().unwrap();
        assert_eq!(options.bitrate, 192_000);
        assert_eq!(options.lookahead, Duration::from_millis(2500));
        assert_eq!(options.listener_queue, 64);
        assert_eq!(options.backlog_frames, 500);
    }

    #[test]
    fn test_malformed_values_fall_back_to_defaults() {
        let config = Config::embedded();
        config
            .set_value(BITRATE, Value::String("lots".into()))
            .unwrap();
        config.set_value(MAX_START_FAILURES, Value::Bool(true)).unwrap();

        assert_eq!(config.get_radio_bitrate().unwrap(), 128_000);
        assert_eq!(config.get_radio_max_start_failures().unwrap(), 5);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let config = Config::embedded();
        config.set_radio_listener_queue(0).unwrap();
        assert!(config.get_radio_stream_options().is_err());
    }
}
