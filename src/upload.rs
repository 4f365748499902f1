//! Receiving an uploaded photo.
//!
//! The card sends a tar archive holding the photo and, optionally, a log
//! file named after it, together with an integrity digest over the archive.
//! The archive is unpacked into a private staging directory next to the
//! card's target directory, checked against the digest and only then linked
//! into place and recorded.
use std::fs::{
    set_permissions,
    OpenOptions,
    Permissions,
};
use std::io;
use std::os::unix::fs::{
    OpenOptionsExt,
    PermissionsExt,
};
use std::path::{
    Path,
    PathBuf,
};

use chrono::Utc;
use log::{debug, info};
use mime::Mime;
use tar::Archive;
use tempfile::Builder;

use crate::config::CardConfig;
use crate::digest::integrity_digest;
use crate::error::{
    ErrorKind,
    ServiceError,
    ServiceResult,
};
use crate::hook::{
    dispatch,
    HookEvent,
    Launcher,
};
use crate::ledger::{
    Ledger,
    PhotoKey,
    PhotoRecord,
};
use crate::record::{
    place,
    Placed,
};
use crate::session::Session;

pub const PART_DIGEST: &str = "INTEGRITYDIGEST";
pub const PART_ARCHIVE: &str = "FILENAME";
pub const ARCHIVE_SUFFIX: &str = ".tar";
const STAGING_PREFIX: &str = ".incoming.";

/// One part of a multipart upload body.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub content_type: Option<Mime>,
    pub data: Vec<u8>,
}

/// Arguments of an upload call.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub fileid: i64,
    pub mac: String,
    pub filename: String,
    pub filesize: i64,
    pub filesignature: String,
    pub encryption: String,
    pub flags: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server already had the photo, nothing was written.
    AlreadyComplete,
    Placed(Placed),
}

/// Names of the archive members the server keeps.
#[derive(Debug, PartialEq, Eq)]
pub struct Names {
    pub file: String,
    pub log: String,
}

/// Derive the photo and log names from the declared archive name.
pub fn derive_names(filename: &str) -> ServiceResult<Names> {
    let file = match filename.strip_suffix(ARCHIVE_SUFFIX) {
        Some(v) => v,
        None => {
            return Err(ServiceError::protocol(format!("expected a tarball, not '{}'", filename)));
        },
    };
    if file.is_empty() || file == "." || file == ".." || file.contains('/') || file.contains('\0') {
        return Err(ServiceError::protocol(format!("unusable file name '{}'", filename)));
    }
    Ok(Names{
        file: file.to_string(),
        log: format!("{}.log", file),
    })
}

fn is_tar(m: &Mime) -> bool {
    m.type_() == mime::APPLICATION && m.subtype() == "x-tar"
}

struct Scan<'a> {
    digest: Option<Vec<u8>>,
    archive: Option<&'a [u8]>,
}

fn scan(parts: &[Part]) -> ServiceResult<Scan<'_>> {
    let mut r = Scan{
        digest: None,
        archive: None,
    };
    for part in parts {
        debug!("attachment {} type {:?} size {}", &part.name, &part.content_type, part.data.len());
        if part.name == PART_DIGEST {
            if r.digest.is_some() {
                return Err(ServiceError::protocol("already have integrity digest"));
            }
            let s = String::from_utf8_lossy(&part.data);
            debug!("declared integrity digest {}", s.trim());
            r.digest = Some(hex::decode(s.trim())?);
        } else if part.name == PART_ARCHIVE {
            if r.archive.is_some() {
                return Err(ServiceError::protocol("already seen tarball"));
            }
            match &part.content_type {
                Some(m) if !is_tar(m) => {
                    return Err(ServiceError::protocol(format!("unexpected payload type {}", m)));
                },
                _ => {},
            }
            r.archive = Some(part.data.as_slice());
        }
    }
    Ok(r)
}

enum Member {
    File,
    Log,
    Other,
}

/// Unpack the photo and log members of `data` into `dir`.
fn extract(data: &[u8], dir: &Path, names: &Names, umask: u32) -> ServiceResult<(Option<PathBuf>, Option<PathBuf>)> {
    let mode = 0o666 & !umask;
    let mut file = None;
    let mut log = None;
    let mut archive = Archive::new(data);
    let entries = archive.entries().map_err(|e| ServiceError::io(format!("cannot read tarball: {}", e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ServiceError::io(format!("cannot read tarball: {}", e)))?;
        let member = {
            let p = entry.path_bytes();
            if &*p == names.file.as_bytes() {
                Member::File
            } else if &*p == names.log.as_bytes() {
                Member::Log
            } else {
                debug!("skipping member {}", String::from_utf8_lossy(&p));
                Member::Other
            }
        };
        let (name, slot) = match member {
            Member::File => (&names.file, &mut file),
            Member::Log => (&names.log, &mut log),
            Member::Other => continue,
        };

        let f = dir.join(name);
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&f)
            .map_err(|e| ServiceError::io(format!("failed to create output file {:?}: {}", &f, e)))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| ServiceError::io(format!("failed to untar file into {:?}: {}", &f, e)))?;
        set_permissions(&f, Permissions::from_mode(mode))?;
        *slot = Some(f);
    }
    Ok((file, log))
}

/// Process an upload from the card configured as `card`.
///
/// `session` is the card's current session, if any. It is only consulted
/// for a zero-length upload, which finishes a photo the ledger already holds.
pub fn upload(
    card: &CardConfig,
    ledger: &dyn Ledger,
    launcher: &dyn Launcher,
    session: Option<&mut Session>,
    req: &UploadRequest,
    parts: &[Part],
) -> ServiceResult<UploadOutcome> {
    let names = derive_names(&req.filename)?;
    let found = scan(parts)?;

    let archive = match found.archive {
        Some(v) => v,
        None => {
            return Err(ServiceError::protocol("expected file missing"));
        },
    };
    let digest = integrity_digest(archive, card.key());
    debug!("computed integrity digest {}", hex::encode(&digest));

    if archive.is_empty() {
        let known = match session {
            Some(s) => s.take_already(&req.filename, &req.filesignature, req.filesize),
            None => false,
        };
        if !known {
            return Err(ServiceError::protocol(format!("got zero-length upload for unknown file '{}'", &req.filename)));
        }
        info!("{} from {} was already complete", &req.filename, &req.mac);
        return Ok(UploadOutcome::AlreadyComplete);
    }

    let declared = match found.digest {
        Some(v) => v,
        None => {
            return Err(ServiceError::protocol("integrity digest missing"));
        },
    };

    let staging = Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&card.target_dir)
        .map_err(|e| ServiceError::io(format!("cannot create staging directory in {:?}: {}", &card.target_dir, e)))?;
    debug!("staging in {:?}", staging.path());

    let (file, log) = extract(archive, staging.path(), &names, card.umask)?;
    let file = match file {
        Some(v) => v,
        None => {
            return Err(ServiceError::protocol(format!("expected file missing, no '{}' in tarball", &names.file)));
        },
    };
    if digest != declared {
        return Err(ServiceError::new(ErrorKind::Integrity, "integrity digest verification failed"));
    }

    let placed = place(&card.target_dir, &file, log.as_deref())?;

    ledger.register(&PhotoRecord{
        key: PhotoKey{
            mac: req.mac.clone(),
            filename: req.filename.clone(),
            filesize: req.filesize,
            filesignature: req.filesignature.clone(),
        },
        fileid: req.fileid,
        encryption: req.encryption.clone(),
        flags: req.flags,
        ctime: Utc::now().timestamp(),
    })?;

    dispatch(launcher, card, &HookEvent::UploadComplete{
        mac: &req.mac,
        original: &names.file,
        uploaded: &placed.file,
        log: placed.log.as_deref(),
    });

    Ok(UploadOutcome::Placed(placed))
}
