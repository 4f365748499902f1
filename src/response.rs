use std::str::FromStr;

use ascii::AsciiString;
use log::{error, info};
use quick_xml::escape::escape;
use tiny_http::{
    Header,
    HeaderField,
    Request,
    Response,
    StatusCode,
};

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="EyeFi/SOAP/EyeFilm">"#,
    "<SOAP-ENV:Body>",
);
const ENVELOPE_CLOSE: &str = "</SOAP-ENV:Body></SOAP-ENV:Envelope>";

/// Outcome of one SOAP call, ready to be sent to the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapReply {
    pub operation: String,
    pub fault: bool,
    pub body: String,
    /// The exchange ends with this reply. tiny_http decides connection
    /// reuse itself and refuses a `Connection` header from the handler, so
    /// the request is only logged and the card opens a fresh connection when
    /// it starts over.
    pub close: bool,
}

impl SoapReply {
    /// Successful reply carrying `fields` as children of `<Op>Response`.
    pub fn ok(operation: &str, fields: &[(&str, String)]) -> SoapReply {
        let mut body = String::from(ENVELOPE_OPEN);
        body.push_str(&format!("<ns1:{}Response>", operation));
        for (k, v) in fields {
            body.push_str(&format!("<{}>{}</{}>", k, escape(v.as_str()), k));
        }
        body.push_str(&format!("</ns1:{}Response>", operation));
        body.push_str(ENVELOPE_CLOSE);
        SoapReply{
            operation: operation.to_string(),
            fault: false,
            body,
            close: false,
        }
    }

    /// Generic failure of `operation`. The cause stays in the server log.
    pub fn fault(operation: &str) -> SoapReply {
        let mut body = String::from(ENVELOPE_OPEN);
        body.push_str("<SOAP-ENV:Fault><faultcode>SOAP-ENV:Client</faultcode>");
        body.push_str(&format!("<faultstring>error processing {}</faultstring>", escape(operation)));
        body.push_str("</SOAP-ENV:Fault>");
        body.push_str(ENVELOPE_CLOSE);
        SoapReply{
            operation: operation.to_string(),
            fault: true,
            body,
            close: true,
        }
    }

    pub fn closing(mut self) -> SoapReply {
        self.close = true;
        self
    }
}

fn header(k: &str, v: &str) -> Option<Header> {
    let field = HeaderField::from_str(k).ok()?;
    let value = AsciiString::from_ascii(v).ok()?;
    Some(Header{
        field,
        value,
    })
}

pub fn server_headers() -> Vec<Header> {
    let server_header_v = format!("eyefid/{}, tiny_http (Rust)", env!("CARGO_PKG_VERSION"));
    vec!(
        header("Content-Type", "text/xml; charset=\"utf-8\""),
        header("Server", &server_header_v),
    ).into_iter().flatten().collect()
}

/// Respond with a bare status, for requests that never reach the SOAP layer.
pub fn exec_status(req: Request, status: u16) {
    let res = Response::empty(StatusCode(status));
    if let Err(e) = req.respond(res) {
        error!("cannot respond: {}", e);
    }
}

pub fn exec_response(req: Request, reply: SoapReply) {
    let res_status = match reply.fault {
        true => StatusCode(500),
        false => StatusCode(200),
    };
    if reply.close {
        info!("exchange ends after {}", &reply.operation);
    }

    let mut res = Response::from_string(reply.body).with_status_code(res_status);
    for h in server_headers() {
        res.add_header(h);
    }
    if let Err(e) = req.respond(res) {
        error!("cannot respond to {}: {}", &reply.operation, e);
    }
}
