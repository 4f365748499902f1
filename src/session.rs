use std::collections::HashMap;

use log::debug;

use crate::auth::Nonce;

/// Identifies an upload the ledger reports as already complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSlot {
    pub filename: String,
    pub filesignature: String,
    pub filesize: i64,
}

impl DuplicateSlot {
    pub fn is(&self, filename: &str, filesignature: &str, filesize: i64) -> bool {
        self.filesize == filesize && self.filename == filename && self.filesignature == filesignature
    }
}

/// State kept between the calls of one card.
#[derive(Debug)]
pub struct Session {
    pub nonce: Nonce,
    already: Option<DuplicateSlot>,
}

impl Session {
    pub fn new(nonce: Nonce) -> Session {
        Session{
            nonce,
            already: None,
        }
    }

    /// Remember an upload the card does not need to send again.
    pub fn set_already(&mut self, slot: DuplicateSlot) {
        self.already = Some(slot);
    }

    /// Consume the remembered upload if it is the one described.
    pub fn take_already(&mut self, filename: &str, filesignature: &str, filesize: i64) -> bool {
        match &self.already {
            Some(v) if v.is(filename, filesignature, filesize) => {
                self.already = None;
                true
            },
            _ => false,
        }
    }
}

/// Sessions of all cards talking to the server, keyed by card address.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: HashMap<String, Session>,
}

impl SessionMap {
    pub fn new() -> SessionMap {
        SessionMap::default()
    }

    /// Start a new session for the card, dropping any earlier one.
    pub fn start(&mut self, mac: &str) -> &Session {
        let nonce = Nonce::generate();
        debug!("new session for {} with nonce {}", mac, nonce);
        let k = mac.to_lowercase();
        self.sessions.insert(k.clone(), Session::new(nonce));
        &self.sessions[&k]
    }

    pub fn get(&self, mac: &str) -> Option<&Session> {
        self.sessions.get(&mac.to_lowercase())
    }

    pub fn get_mut(&mut self, mac: &str) -> Option<&mut Session> {
        self.sessions.get_mut(&mac.to_lowercase())
    }
}
