//! Per-card configuration.
//!
//! The configuration file is TOML. Cards are keyed by their MAC address as
//! sent in requests, compared case-insensitively:
//!
//! ``` toml
//! database = "/var/lib/eyefid/photos.db"
//!
//! [cards.0018562a1b2c]
//! upload_key = "000102030405060708090a0b0c0d0e0f"
//! target_dir = "/srv/photos"
//! umask = 0o022
//! on_upload_photo = "exiftool -overwrite_original -Artist=me \"$EYEFI_UPLOADED\""
//! ```
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs::read_to_string;
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;

use log::debug;
use serde::Deserialize;

use crate::error::{
    ErrorKind,
    ServiceError,
    ServiceResult,
};

const UPLOAD_KEY_LEN: usize = 16;

fn default_umask() -> u32 {
    0o022
}

/// Everything the server knows about a single card.
#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    /// Upload key shared with the card, hex.
    pub upload_key: String,
    /// Directory uploaded photos are placed in.
    pub target_dir: PathBuf,
    /// Bits cleared from the mode of extracted files.
    #[serde(default = "default_umask")]
    pub umask: u32,
    pub on_start_session: Option<String>,
    pub on_mark_last_photo_in_roll: Option<String>,
    pub on_upload_photo: Option<String>,
    #[serde(skip)]
    key: Vec<u8>,
}

impl CardConfig {
    /// The decoded upload key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Server-wide configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// SQLite database recording completed uploads. Without it every upload
    /// is treated as new.
    pub database: Option<PathBuf>,
    #[serde(default)]
    cards: HashMap<String, CardConfig>,
}

#[derive(Debug)]
pub struct ConfigError {
    v: String,
}

impl Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "invalid configuration: {}", self.v)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Config, ConfigError> {
        let raw: Config = toml::from_str(s).map_err(|e| ConfigError{
            v: e.to_string(),
        })?;
        let mut cards = HashMap::with_capacity(raw.cards.len());
        for (mac, mut card) in raw.cards {
            card.key = match hex::decode(card.upload_key.trim()) {
                Ok(v) => v,
                Err(e) => {
                    return Err(ConfigError{
                        v: format!("upload key for card {}: {}", mac, e),
                    });
                },
            };
            if card.key.len() != UPLOAD_KEY_LEN {
                return Err(ConfigError{
                    v: format!("upload key for card {} must be {} bytes", mac, UPLOAD_KEY_LEN),
                });
            }
            debug!("configured card {} -> {:?}", &mac, &card.target_dir);
            cards.insert(mac.to_lowercase(), card);
        }
        Ok(Config{
            database: raw.database,
            cards,
        })
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let s = read_to_string(path).map_err(|e| ConfigError{
            v: format!("{}: {}", path.display(), e),
        })?;
        Config::from_str(&s)
    }

    /// Look up the card with the given address.
    pub fn card(&self, mac: &str) -> ServiceResult<&CardConfig> {
        match self.cards.get(&mac.to_lowercase()) {
            Some(v) => Ok(v),
            None => Err(ServiceError::new(ErrorKind::UnknownCard, format!("no configuration for card '{}'", mac))),
        }
    }
}
