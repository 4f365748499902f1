use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use log::{debug, error, warn};
use mime::Mime;
use multipart::server::Multipart;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{
    ServiceError,
    ServiceResult,
};
use crate::response::SoapReply;
use crate::service::{
    PhotoStatusRequest,
    Service,
};
use crate::upload::{
    Part,
    UploadRequest,
};

/// Multipart part holding the SOAP envelope of an upload.
pub const PART_ENVELOPE: &str = "SOAPENVELOPE";

/// Upper bound on the request body read into memory.
pub const MAX_BODY_LEN: u64 = 64 * 1024 * 1024;

/// A decoded SOAP call: the operation element and its argument elements.
#[derive(Debug, Default)]
pub struct SoapCall {
    pub operation: String,
    args: HashMap<String, String>,
}

impl SoapCall {
    pub fn parse(xml: &[u8]) -> ServiceResult<SoapCall> {
        let mut reader = Reader::from_reader(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut stack: Vec<String> = vec!();
        let mut call = SoapCall::default();

        loop {
            let ev = reader.read_event_into(&mut buf)
                .map_err(|e| ServiceError::protocol(format!("bad SOAP envelope: {}", e)))?;
            match ev {
                Event::Start(e) => {
                    stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                    let n = stack.len();
                    if n >= 2 && stack[n - 2] == "Body" && call.operation.is_empty() {
                        call.operation = stack[n - 1].clone();
                    }
                },
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    let n = stack.len();
                    if n >= 1 && stack[n - 1] == "Body" && call.operation.is_empty() {
                        call.operation = name;
                    } else if n >= 2 && stack[n - 2] == "Body" {
                        call.args.insert(name, String::new());
                    }
                },
                Event::Text(t) => {
                    let n = stack.len();
                    if n >= 3 && stack[n - 3] == "Body" {
                        let v = t.unescape()
                            .map_err(|e| ServiceError::protocol(format!("bad SOAP envelope: {}", e)))?;
                        call.args.insert(stack[n - 1].clone(), v.into_owned());
                    }
                },
                Event::End(_) => {
                    stack.pop();
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        if call.operation.is_empty() {
            return Err(ServiceError::protocol("no operation in SOAP body"));
        }
        debug!("soap call {} {:?}", &call.operation, &call.args);
        Ok(call)
    }

    pub fn text(&self, k: &str) -> ServiceResult<&str> {
        match self.args.get(k) {
            Some(v) => Ok(v.as_str()),
            None => Err(ServiceError::protocol(format!("{} without {}", &self.operation, k))),
        }
    }

    pub fn number<T: FromStr>(&self, k: &str) -> ServiceResult<T> {
        let v = self.text(k)?;
        v.trim().parse().map_err(|_| ServiceError::protocol(format!("{} '{}' is not a number", k, v)))
    }
}

fn read_parts(body: impl Read, boundary: &str) -> ServiceResult<Vec<Part>> {
    let mut mp = Multipart::with_body(body, boundary);
    let mut parts = vec!();
    while let Some(mut field) = mp.read_entry().map_err(|e| ServiceError::protocol(format!("bad multipart body: {}", e)))? {
        let mut data = Vec::new();
        field.data.read_to_end(&mut data)?;
        parts.push(Part{
            name: field.headers.name.to_string(),
            content_type: field.headers.content_type.clone(),
            data,
        });
    }
    Ok(parts)
}

/// Split a request body into the SOAP call and any attached parts.
pub fn decode(content_type: Option<&str>, body: impl Read) -> ServiceResult<(SoapCall, Vec<Part>)> {
    let mut body = body.take(MAX_BODY_LEN);
    let boundary = content_type
        .and_then(|v| Mime::from_str(v).ok())
        .filter(|m| m.type_() == mime::MULTIPART)
        .and_then(|m| m.get_param(mime::BOUNDARY).map(|b| b.as_str().to_string()));

    match boundary {
        Some(b) => {
            let parts = read_parts(body, &b)?;
            let envelope = match parts.iter().find(|p| p.name == PART_ENVELOPE) {
                Some(v) => v,
                None => {
                    return Err(ServiceError::protocol("multipart request without SOAP envelope"));
                },
            };
            let call = SoapCall::parse(&envelope.data)?;
            Ok((call, parts))
        },
        None => {
            let mut data = Vec::new();
            body.read_to_end(&mut data)?;
            Ok((SoapCall::parse(&data)?, vec!()))
        },
    }
}

fn dispatch(svc: &mut Service, call: &SoapCall, parts: &[Part]) -> ServiceResult<SoapReply> {
    match call.operation.as_str() {
        "StartSession" => {
            let r = svc.start_session(
                call.text("macaddress")?,
                call.text("cnonce")?,
                call.number("transfermode")?,
                call.number("transfermodetimestamp")?,
            )?;
            Ok(SoapReply::ok("StartSession", &[
                ("credential", r.credential),
                ("snonce", r.snonce),
                ("transfermode", r.transfermode.to_string()),
                ("transfermodetimestamp", r.transfermodetimestamp.to_string()),
                ("upsyncallowed", r.upsyncallowed.to_string()),
            ]))
        },
        "GetPhotoStatus" => {
            let req = PhotoStatusRequest{
                credential: call.text("credential")?.to_string(),
                mac: call.text("macaddress")?.to_string(),
                filename: call.text("filename")?.to_string(),
                filesize: call.number("filesize")?,
                filesignature: call.text("filesignature")?.to_string(),
                flags: call.number("flags")?,
            };
            let r = svc.get_photo_status(&req)?;
            Ok(SoapReply::ok("GetPhotoStatus", &[
                ("fileid", r.fileid.to_string()),
                ("offset", r.offset.to_string()),
            ]))
        },
        "MarkLastPhotoInRoll" => {
            svc.mark_last_photo_in_roll(call.text("macaddress")?, call.number("mergedelta")?)?;
            Ok(SoapReply::ok("MarkLastPhotoInRoll", &[]).closing())
        },
        "UploadPhoto" => {
            let req = UploadRequest{
                fileid: call.number("fileid")?,
                mac: call.text("macaddress")?.to_string(),
                filename: call.text("filename")?.to_string(),
                filesize: call.number("filesize")?,
                filesignature: call.text("filesignature")?.to_string(),
                encryption: call.text("encryption")?.to_string(),
                flags: call.number("flags")?,
            };
            svc.upload_photo(&req, parts)?;
            Ok(SoapReply::ok("UploadPhoto", &[
                ("success", String::from("true")),
            ]))
        },
        v => Err(ServiceError::protocol(format!("unknown operation {}", v))),
    }
}

/// Handle one SOAP request against `svc`.
///
/// Failures are logged in full here; the card only learns which operation
/// failed.
pub fn process_soap(svc: &mut Service, content_type: Option<&str>, body: impl Read) -> SoapReply {
    let (call, parts) = match decode(content_type, body) {
        Ok(v) => v,
        Err(e) => {
            warn!("error while processing request: {}", e);
            return SoapReply::fault("request");
        },
    };
    match dispatch(svc, &call, &parts) {
        Ok(v) => v,
        Err(e) => {
            error!("error while processing {}: {}", &call.operation, e);
            SoapReply::fault(&call.operation)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, process_soap, SoapCall};
    use crate::auth::{Credential, Nonce};
    use crate::digest::integrity_digest;
    use crate::error::ErrorKind;
    use crate::hook::tests::RecordingLauncher;
    use crate::ledger::NoLedger;
    use crate::service::Service;
    use crate::upload::tests::{config, tarball, KEY};
    use std::fs::read;
    use tempfile::tempdir;

    const START: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="EyeFi/SOAP/EyeFilm">
  <SOAP-ENV:Body>
    <ns1:StartSession>
      <macaddress>0018562a1b2c</macaddress>
      <cnonce>00112233445566778899aabbccddeeff</cnonce>
      <transfermode>2</transfermode>
      <transfermodetimestamp>1230268824</transfermodetimestamp>
      <note/>
    </ns1:StartSession>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    #[test]
    fn test_parse_call() {
        let c = SoapCall::parse(START.as_bytes()).unwrap();
        assert_eq!(c.operation, "StartSession");
        assert_eq!(c.text("macaddress").unwrap(), "0018562a1b2c");
        assert_eq!(c.number::<i32>("transfermode").unwrap(), 2);
        assert_eq!(c.number::<i64>("transfermodetimestamp").unwrap(), 1230268824);
        assert_eq!(c.text("note").unwrap(), "");
    }

    #[test]
    fn test_missing_and_bad_args() {
        let c = SoapCall::parse(START.as_bytes()).unwrap();
        assert_eq!(c.text("credential").unwrap_err().kind, ErrorKind::Protocol);
        assert_eq!(c.number::<i32>("macaddress").unwrap_err().kind, ErrorKind::Protocol);
    }

    #[test]
    fn test_no_body() {
        let e = SoapCall::parse(b"<a><b/></a>").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Protocol);
        assert!(SoapCall::parse(b"<SOAP-ENV:Envelope><SOAP-ENV:Body>").is_err());
    }

    #[test]
    fn test_decode_multipart() {
        let body = concat!(
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"SOAPENVELOPE\"\r\n",
            "\r\n",
            "<Envelope><Body><UploadPhoto><fileid>1</fileid></UploadPhoto></Body></Envelope>\r\n",
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"INTEGRITYDIGEST\"\r\n",
            "\r\n",
            "00112233445566778899aabbccddeeff\r\n",
            "--xyz--\r\n",
        );
        let (call, parts) = decode(Some("multipart/form-data; boundary=xyz"), body.as_bytes()).unwrap();
        assert_eq!(call.operation, "UploadPhoto");
        assert_eq!(call.number::<i64>("fileid").unwrap(), 1);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].name, "INTEGRITYDIGEST");
        assert_eq!(parts[1].data, b"00112233445566778899aabbccddeeff");
    }

    #[test]
    fn test_decode_multipart_without_envelope() {
        let body = concat!(
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"INTEGRITYDIGEST\"\r\n",
            "\r\n",
            "00\r\n",
            "--xyz--\r\n",
        );
        let e = decode(Some("multipart/form-data; boundary=xyz"), body.as_bytes()).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Protocol);
    }

    fn envelope(op: &str, args: &[(&str, &str)]) -> String {
        let mut s = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="EyeFi/SOAP/EyeFilm"><SOAP-ENV:Body>"#);
        s.push_str(&format!("<ns1:{}>", op));
        for (k, v) in args {
            s.push_str(&format!("<{}>{}</{}>", k, v, k));
        }
        s.push_str(&format!("</ns1:{}></SOAP-ENV:Body></SOAP-ENV:Envelope>", op));
        s
    }

    fn element<'a>(body: &'a str, name: &str) -> &'a str {
        let open = format!("<{}>", name);
        let start = body.find(&open).unwrap() + open.len();
        let end = body[start..].find('<').unwrap() + start;
        &body[start..end]
    }

    fn form_part(out: &mut Vec<u8>, name: &str, content_type: Option<&str>, data: &[u8]) {
        out.extend_from_slice(b"--BOUNDARY\r\n");
        out.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes());
        if let Some(t) = content_type {
            out.extend_from_slice(format!("Content-Type: {}\r\n", t).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
    }

    #[test]
    fn test_card_conversation() {
        let d = tempdir().unwrap();
        let mut svc = Service::new(config(d.path(), ""), Box::new(NoLedger), Box::new(RecordingLauncher::default()));

        let start = envelope("StartSession", &[
            ("macaddress", "0018562a1b2c"),
            ("cnonce", "00112233445566778899aabbccddeeff"),
            ("transfermode", "2"),
            ("transfermodetimestamp", "1230268824"),
        ]);
        let r = process_soap(&mut svc, Some("text/xml; charset=\"utf-8\""), start.as_bytes());
        assert!(!r.fault, "{}", r.body);
        assert_eq!(element(&r.body, "credential"), "a34f312217c1d87344fb510983dd5ec4");
        assert_eq!(element(&r.body, "upsyncallowed"), "false");

        let mut n = [0u8; 16];
        n.copy_from_slice(&hex::decode(element(&r.body, "snonce")).unwrap());
        let credential = Credential::expected("0018562a1b2c", &KEY, &Nonce::from(n)).unwrap().to_string();

        let status = envelope("GetPhotoStatus", &[
            ("credential", credential.as_str()),
            ("macaddress", "0018562a1b2c"),
            ("filename", "DSCF0001.JPG.tar"),
            ("filesize", "10240"),
            ("filesignature", "31323334353637383930313233343536"),
            ("flags", "4"),
        ]);
        let r = process_soap(&mut svc, Some("text/xml"), status.as_bytes());
        assert!(!r.fault, "{}", r.body);
        assert_eq!(element(&r.body, "fileid"), "1");
        assert_eq!(element(&r.body, "offset"), "0");

        let tar = tarball(&[("DSCF0001.JPG", "jpeg data")]);
        let digest = hex::encode(integrity_digest(&tar, &KEY));
        let upload = envelope("UploadPhoto", &[
            ("fileid", "1"),
            ("macaddress", "0018562a1b2c"),
            ("filename", "DSCF0001.JPG.tar"),
            ("filesize", "10240"),
            ("filesignature", "31323334353637383930313233343536"),
            ("encryption", "none"),
            ("flags", "4"),
        ]);
        let mut body = Vec::new();
        form_part(&mut body, "SOAPENVELOPE", None, upload.as_bytes());
        form_part(&mut body, "FILENAME", Some("application/x-tar"), &tar);
        form_part(&mut body, "INTEGRITYDIGEST", None, digest.as_bytes());
        body.extend_from_slice(b"--BOUNDARY--\r\n");

        let r = process_soap(&mut svc, Some("multipart/form-data; boundary=BOUNDARY"), body.as_slice());
        assert!(!r.fault, "{}", r.body);
        assert_eq!(element(&r.body, "success"), "true");
        assert_eq!(read(d.path().join("DSCF0001.JPG")).unwrap(), b"jpeg data");

        let last = envelope("MarkLastPhotoInRoll", &[
            ("macaddress", "0018562a1b2c"),
            ("mergedelta", "0"),
        ]);
        let r = process_soap(&mut svc, Some("text/xml"), last.as_bytes());
        assert!(!r.fault);
        assert!(r.close);
    }

    #[test]
    fn test_failure_is_generic_fault() {
        let d = tempdir().unwrap();
        let mut svc = Service::new(config(d.path(), ""), Box::new(NoLedger), Box::new(RecordingLauncher::default()));
        let status = envelope("GetPhotoStatus", &[
            ("credential", "00000000000000000000000000000000"),
            ("macaddress", "0018562a1b2c"),
            ("filename", "DSCF0001.JPG.tar"),
            ("filesize", "10240"),
            ("filesignature", "31323334353637383930313233343536"),
            ("flags", "4"),
        ]);
        let r = process_soap(&mut svc, Some("text/xml"), status.as_bytes());
        assert!(r.fault);
        assert!(r.close);
        assert_eq!(element(&r.body, "faultstring"), "error processing GetPhotoStatus");
        assert!(!r.body.contains("authentication"));
    }

    #[test]
    fn test_unknown_operation() {
        let d = tempdir().unwrap();
        let mut svc = Service::new(config(d.path(), ""), Box::new(NoLedger), Box::new(RecordingLauncher::default()));
        let r = process_soap(&mut svc, Some("text/xml"), envelope("Reboot", &[]).as_bytes());
        assert!(r.fault);
        assert_eq!(element(&r.body, "faultstring"), "error processing Reboot");

        let r = process_soap(&mut svc, Some("text/xml"), &b"not xml at all"[..]);
        assert!(r.fault);
    }
}
