use log::info;

use crate::error::ServiceResult;
use crate::ledger::{
    Ledger,
    PhotoKey,
};
use crate::session::{
    DuplicateSlot,
    Session,
};

/// Answer to a photo status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoStatus {
    pub fileid: i64,
    /// Bytes the server already holds. Either nothing or the whole file.
    pub offset: i64,
}

impl PhotoStatus {
    pub const NEW: PhotoStatus = PhotoStatus{
        fileid: 1,
        offset: 0,
    };
}

/// Decide whether the upload described by `key` must be sent.
///
/// A complete upload is remembered in the card's session so that the
/// zero-length upload the card sends to finish it can be accepted.
pub fn resolve(ledger: &dyn Ledger, session: &mut Session, key: &PhotoKey) -> ServiceResult<PhotoStatus> {
    match ledger.lookup(key)? {
        Some(fileid) => {
            info!("{} from {} is already complete as file {}", &key.filename, &key.mac, fileid);
            session.set_already(DuplicateSlot{
                filename: key.filename.clone(),
                filesignature: key.filesignature.clone(),
                filesize: key.filesize,
            });
            Ok(PhotoStatus{
                fileid,
                offset: key.filesize,
            })
        },
        None => Ok(PhotoStatus::NEW),
    }
}
