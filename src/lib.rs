#![crate_name = "eyefid"]

//! eyefid receives photos from Eye-Fi wireless memory cards.
//!
//! A card talks SOAP over HTTP. It opens a session with `StartSession`,
//! asks with `GetPhotoStatus` whether each photo is already on the server,
//! sends it with `UploadPhoto` and ends the roll with `MarkLastPhotoInRoll`.
//!
//! ## Authentication
//!
//! Every card shares an upload key with the server. Credentials are MD5
//! digests over the card address, a nonce and the key, see
//! [eyefid::auth](crate::auth). Uploads carry an integrity digest keyed with
//! the same upload key, see [eyefid::digest](crate::digest).
//!
//! ## Placement
//!
//! Photos are unpacked into a staging directory and hard linked into the
//! card's target directory. Existing files are never replaced; a clashing
//! photo is stored as `(00001)<name>` and so on.
//!
//! ## Resuming
//!
//! If a database is configured, completed uploads are recorded. A card asking
//! about a recorded photo is told it is complete, and the zero-length upload
//! it then sends is accepted without writing anything.
//!
//! ## Hooks
//!
//! A shell command can be configured per card for session start, upload
//! completion and the end of a roll. See [eyefid::hook](crate::hook) for the
//! environment passed to it.

/// Card credentials and server nonces.
pub mod auth;

/// Command line settings.
pub mod arg;

/// Per-card configuration.
pub mod config;

pub mod digest;

pub mod error;

pub mod hook;

/// Record of completed uploads.
pub mod ledger;

/// Placement of received files.
pub mod record;

/// Decodes incoming SOAP requests.
pub mod request;

/// Encodes outgoing SOAP responses.
pub mod response;

/// The protocol operations.
pub mod service;

pub mod session;

pub mod status;

pub mod upload;
