//! Placement of received files into the card's target directory.
//!
//! Files are hard linked from the staging directory, so a file either appears
//! under its final name complete or not at all. An existing file is never
//! replaced. When the name is taken, the photo and its log are moved to
//! `(00001)<name>`, `(00002)<name>` and so on, always using the same index for
//! both.
use std::ffi::{
    OsStr,
    OsString,
};
use std::fs::{
    hard_link,
    remove_file,
};
use std::io;
use std::path::{
    Path,
    PathBuf,
};

use log::{debug, info, warn};

use crate::error::{
    ErrorKind,
    ServiceError,
    ServiceResult,
};

/// Number of names tried before giving up.
pub const MAX_ATTEMPTS: u32 = 32767;

/// Final location of a placed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placed {
    pub file: PathBuf,
    pub log: Option<PathBuf>,
}

fn candidate(dir: &Path, name: &OsStr, i: u32) -> PathBuf {
    if i == 0 {
        return dir.join(name);
    }
    let mut s = OsString::from(format!("({:05})", i));
    s.push(name);
    dir.join(s)
}

fn basename(p: &Path) -> ServiceResult<&OsStr> {
    match p.file_name() {
        Some(v) => Ok(v),
        None => Err(ServiceError::io(format!("staged path {:?} has no file name", p))),
    }
}

fn link_error(from: &Path, to: &Path, e: io::Error) -> ServiceError {
    ServiceError::io(format!("cannot link {:?} to {:?}: {}", from, to, e))
}

/// Link the staged `file`, and `log` if given, into `dir`.
///
/// The staged originals are removed once both links exist.
pub fn place(dir: &Path, file: &Path, log: Option<&Path>) -> ServiceResult<Placed> {
    place_within(dir, file, log, MAX_ATTEMPTS)
}

fn place_within(dir: &Path, file: &Path, log: Option<&Path>, attempts: u32) -> ServiceResult<Placed> {
    let file_name = basename(file)?;
    let log_name = match log {
        Some(v) => Some(basename(v)?),
        None => None,
    };

    for i in 0..attempts {
        let tf = candidate(dir, file_name, i);
        match hard_link(file, &tf) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{:?} exists", &tf);
                continue;
            },
            Err(e) => {
                return Err(link_error(file, &tf, e));
            },
        };

        let tl = match (log, log_name) {
            (Some(l), Some(n)) => {
                let tl = candidate(dir, n, i);
                match hard_link(l, &tl) {
                    Ok(()) => Some(tl),
                    Err(e) => {
                        // the photo link is ours, the pair moves on together
                        if let Err(ue) = remove_file(&tf) {
                            warn!("cannot unlink {:?}: {}", &tf, ue);
                        }
                        if e.kind() == io::ErrorKind::AlreadyExists {
                            debug!("{:?} exists", &tl);
                            continue;
                        }
                        return Err(link_error(l, &tl, e));
                    },
                }
            },
            _ => None,
        };

        for staged in Some(file).into_iter().chain(log) {
            if let Err(e) = remove_file(staged) {
                warn!("cannot remove staged {:?}: {}", staged, e);
            }
        }
        info!("placed {:?}", &tf);
        return Ok(Placed{
            file: tf,
            log: tl,
        });
    }

    Err(ServiceError::new(ErrorKind::Exhausted, format!("no free name for {:?} in {:?}", file_name, dir)))
}
