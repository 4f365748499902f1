//! The four operations a card calls, in the order it calls them.
use log::info;

use crate::auth::Credential;
use crate::config::Config;
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
};
use crate::session::SessionMap;
use crate::status::{
    resolve,
    PhotoStatus,
};
use crate::upload::{
    upload,
    Part,
    UploadOutcome,
    UploadRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSessionResponse {
    pub credential: String,
    pub snonce: String,
    pub transfermode: i32,
    pub transfermodetimestamp: i64,
    pub upsyncallowed: bool,
}

/// Arguments of a photo status query.
#[derive(Debug, Clone)]
pub struct PhotoStatusRequest {
    pub credential: String,
    pub mac: String,
    pub filename: String,
    pub filesize: i64,
    pub filesignature: String,
    pub flags: i64,
}

pub struct Service {
    config: Config,
    sessions: SessionMap,
    ledger: Box<dyn Ledger>,
    launcher: Box<dyn Launcher>,
}

impl Service {
    pub fn new(config: Config, ledger: Box<dyn Ledger>, launcher: Box<dyn Launcher>) -> Service {
        Service{
            config,
            sessions: SessionMap::new(),
            ledger,
            launcher,
        }
    }

    pub fn start_session(&mut self, mac: &str, cnonce: &str, transfermode: i32, transfermodetimestamp: i64) -> ServiceResult<StartSessionResponse> {
        info!("StartSession request from {} with cnonce={}, transfermode={}, transfermodetimestamp={}", mac, cnonce, transfermode, transfermodetimestamp);
        let card = self.config.card(mac)?;
        let credential = Credential::initial(mac, cnonce, card.key())?;
        let session = self.sessions.start(mac);

        let r = StartSessionResponse{
            credential: credential.to_string(),
            snonce: session.nonce.to_string(),
            transfermode,
            transfermodetimestamp,
            upsyncallowed: false,
        };

        dispatch(self.launcher.as_ref(), card, &HookEvent::SessionStart{
            mac,
            transfermode,
            transfermodetimestamp,
        });
        Ok(r)
    }

    pub fn get_photo_status(&mut self, req: &PhotoStatusRequest) -> ServiceResult<PhotoStatus> {
        info!(
            "GetPhotoStatus request from {} with credential={}, filename={}, filesize={}, filesignature={}, flags={}",
            &req.mac, &req.credential, &req.filename, req.filesize, &req.filesignature, req.flags,
        );
        let card = self.config.card(&req.mac)?;
        let session = match self.sessions.get_mut(&req.mac) {
            Some(v) => v,
            None => {
                return Err(ServiceError::new(ErrorKind::Authentication, format!("no session for card {}", &req.mac)));
            },
        };
        Credential::expected(&req.mac, card.key(), &session.nonce)?.verify(&req.credential)?;

        let key = PhotoKey{
            mac: req.mac.clone(),
            filename: req.filename.clone(),
            filesize: req.filesize,
            filesignature: req.filesignature.clone(),
        };
        resolve(self.ledger.as_ref(), session, &key)
    }

    /// Unauthenticated by protocol: the card sends no credential with it.
    pub fn mark_last_photo_in_roll(&mut self, mac: &str, mergedelta: i32) -> ServiceResult<()> {
        info!("MarkLastPhotoInRoll request from {} with mergedelta={}", mac, mergedelta);
        let card = self.config.card(mac)?;
        dispatch(self.launcher.as_ref(), card, &HookEvent::LastPhotoInRoll{
            mac,
            mergedelta,
        });
        Ok(())
    }

    pub fn upload_photo(&mut self, req: &UploadRequest, parts: &[Part]) -> ServiceResult<UploadOutcome> {
        info!(
            "UploadPhoto request from {} with fileid={}, filename={}, filesize={}, filesignature={}, encryption={}, flags={:04X}",
            &req.mac, req.fileid, &req.filename, req.filesize, &req.filesignature, &req.encryption, req.flags,
        );
        let card = self.config.card(&req.mac)?;
        let session = self.sessions.get_mut(&req.mac);
        upload(card, self.ledger.as_ref(), self.launcher.as_ref(), session, req, parts)
    }
}

#[cfg(test)]
mod tests {
    use super::{PhotoStatusRequest, Service};
    use crate::auth::{Credential, Nonce};
    use crate::error::ErrorKind;
    use crate::hook::tests::{env_get, RecordingLauncher};
    use crate::ledger::{Ledger, NoLedger, SqliteLedger};
    use crate::status::PhotoStatus;
    use crate::upload::tests::{config, parts, tarball, KEY};
    use crate::upload::{UploadOutcome, UploadRequest};
    use rusqlite::Connection;
    use std::fs::read_dir;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::tempdir;

    const MAC: &str = "0018562a1b2c";
    const CNONCE: &str = "00112233445566778899aabbccddeeff";
    const SIGNATURE: &str = "31323334353637383930313233343536";

    struct SharedLedger(Rc<SqliteLedger>);

    impl Ledger for SharedLedger {
        fn lookup(&self, key: &crate::ledger::PhotoKey) -> crate::error::ServiceResult<Option<i64>> {
            self.0.lookup(key)
        }

        fn register(&self, record: &crate::ledger::PhotoRecord) -> crate::error::ServiceResult<()> {
            self.0.register(record)
        }
    }

    fn service(target: &Path, ledger: Box<dyn Ledger>, launcher: RecordingLauncher) -> Service {
        let cfg = config(target, "on_start_session = \"started\"\non_mark_last_photo_in_roll = \"done\"\non_upload_photo = \"uploaded\"");
        Service::new(cfg, ledger, Box::new(launcher))
    }

    fn credential(snonce: &str) -> String {
        let n = hex::decode(snonce).unwrap();
        let mut v = [0u8; 16];
        v.copy_from_slice(&n);
        Credential::expected(MAC, &KEY, &Nonce::from(v)).unwrap().to_string()
    }

    fn status_request(credential: String) -> PhotoStatusRequest {
        PhotoStatusRequest{
            credential,
            mac: String::from(MAC),
            filename: String::from("DSCF0001.JPG.tar"),
            filesize: 10240,
            filesignature: String::from(SIGNATURE),
            flags: 4,
        }
    }

    fn upload_request() -> UploadRequest {
        UploadRequest{
            fileid: 1,
            mac: String::from(MAC),
            filename: String::from("DSCF0001.JPG.tar"),
            filesize: 10240,
            filesignature: String::from(SIGNATURE),
            encryption: String::from("none"),
            flags: 4,
        }
    }

    #[test]
    fn test_start_session() {
        let d = tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let mut svc = service(d.path(), Box::new(NoLedger), launcher.clone());

        let r = svc.start_session(MAC, CNONCE, 2, 1230268824).unwrap();
        assert_eq!(r.credential, "a34f312217c1d87344fb510983dd5ec4");
        assert_eq!(r.snonce.len(), 32);
        assert_eq!(r.transfermode, 2);
        assert_eq!(r.transfermodetimestamp, 1230268824);
        assert!(!r.upsyncallowed);

        let calls = launcher.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "started");
        assert_eq!(env_get(&calls[0].1, "EYEFI_TRANSFERMODE"), Some("2"));
    }

    #[test]
    fn test_unknown_card() {
        let d = tempdir().unwrap();
        let mut svc = service(d.path(), Box::new(NoLedger), RecordingLauncher::default());
        let e = svc.start_session("001856ffffff", CNONCE, 2, 0).unwrap_err();
        assert_eq!(e.kind, ErrorKind::UnknownCard);
    }

    #[test]
    fn test_status_after_session() {
        let d = tempdir().unwrap();
        let mut svc = service(d.path(), Box::new(NoLedger), RecordingLauncher::default());
        let r = svc.start_session(MAC, CNONCE, 2, 0).unwrap();

        let st = svc.get_photo_status(&status_request(credential(&r.snonce))).unwrap();
        assert_eq!(st, PhotoStatus::NEW);
    }

    #[test]
    fn test_status_bad_credential() {
        let d = tempdir().unwrap();
        let mut svc = service(d.path(), Box::new(NoLedger), RecordingLauncher::default());
        let r = svc.start_session(MAC, CNONCE, 2, 0).unwrap();

        let mut c = hex::decode(credential(&r.snonce)).unwrap();
        c[0] ^= 0x80;
        let e = svc.get_photo_status(&status_request(hex::encode(c))).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_status_without_session() {
        let d = tempdir().unwrap();
        let mut svc = service(d.path(), Box::new(NoLedger), RecordingLauncher::default());
        let e = svc.get_photo_status(&status_request(String::from("00000000000000000000000000000000"))).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_new_session_invalidates_old_credential() {
        let d = tempdir().unwrap();
        let mut svc = service(d.path(), Box::new(NoLedger), RecordingLauncher::default());
        let first = svc.start_session(MAC, CNONCE, 2, 0).unwrap();
        svc.start_session(MAC, CNONCE, 2, 0).unwrap();

        let e = svc.get_photo_status(&status_request(credential(&first.snonce))).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_upload_then_resume() {
        let d = tempdir().unwrap();
        let ledger = Rc::new(SqliteLedger::with_connection(Connection::open_in_memory().unwrap()).unwrap());
        let launcher = RecordingLauncher::default();
        let mut svc = service(d.path(), Box::new(SharedLedger(ledger.clone())), launcher.clone());

        let r = svc.start_session(MAC, CNONCE, 2, 0).unwrap();
        let st = svc.get_photo_status(&status_request(credential(&r.snonce))).unwrap();
        assert_eq!(st, PhotoStatus::NEW);

        let tar = tarball(&[("DSCF0001.JPG", "jpeg data")]);
        match svc.upload_photo(&upload_request(), &parts(tar)).unwrap() {
            UploadOutcome::Placed(p) => assert_eq!(p.file, d.path().join("DSCF0001.JPG")),
            _ => panic!("expected placement"),
        }

        // the card comes back with the same photo
        let r = svc.start_session(MAC, CNONCE, 2, 0).unwrap();
        let st = svc.get_photo_status(&status_request(credential(&r.snonce))).unwrap();
        assert_eq!(st, PhotoStatus{ fileid: 1, offset: 10240 });

        let before = read_dir(d.path()).unwrap().count();
        let out = svc.upload_photo(&upload_request(), &parts(Vec::new())).unwrap();
        assert_eq!(out, UploadOutcome::AlreadyComplete);
        assert_eq!(read_dir(d.path()).unwrap().count(), before);

        let uploaded: Vec<_> = launcher.calls.borrow().iter().filter(|(c, _)| c == "uploaded").cloned().collect();
        assert_eq!(uploaded.len(), 1);
    }

    #[test]
    fn test_mark_last_photo() {
        let d = tempdir().unwrap();
        let launcher = RecordingLauncher::default();
        let mut svc = service(d.path(), Box::new(NoLedger), launcher.clone());

        svc.mark_last_photo_in_roll(MAC, 3).unwrap();
        let calls = launcher.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "done");
        assert_eq!(env_get(&calls[0].1, "EYEFI_MERGEDELTA"), Some("3"));
    }
}
