use std::process::exit;

use tiny_http::{
    Method,
    Server,
    ServerConfig,
};

use env_logger;
use log::{debug, error, info};

use eyefid::arg::Settings;
use eyefid::config::Config;
use eyefid::hook::ShellLauncher;
use eyefid::ledger::{
    Ledger,
    NoLedger,
    SqliteLedger,
};
use eyefid::request::process_soap;
use eyefid::response::{
    exec_response,
    exec_status,
};
use eyefid::service::Service;

fn fail(msg: String) -> ! {
    error!("{}", msg);
    exit(1);
}

fn main() {
    env_logger::init();

    let settings = match Settings::from_args() {
        Ok(v) => v,
        Err(e) => fail(e),
    };

    let cfg = match Config::load(&settings.config) {
        Ok(v) => v,
        Err(e) => fail(e.to_string()),
    };

    let ledger: Box<dyn Ledger> = match &cfg.database {
        Some(p) => {
            match SqliteLedger::open(p) {
                Ok(v) => {
                    info!("recording uploads in {:?}", p);
                    Box::new(v)
                },
                Err(e) => fail(format!("cannot open database {:?}: {}", p, e)),
            }
        },
        None => {
            info!("no database configured, every upload is new");
            Box::new(NoLedger)
        },
    };

    let mut svc = Service::new(cfg, ledger, Box::new(ShellLauncher));

    let srv_cfg = ServerConfig{
        addr: (settings.host.as_str(), settings.port),
        ssl: None,
    };
    let srv = match Server::new(srv_cfg) {
        Ok(v) => v,
        Err(e) => fail(format!("cannot listen on {}:{}: {}", &settings.host, settings.port, e)),
    };
    info!("listening on {}:{}", &settings.host, settings.port);

    loop {
        let mut req = match srv.recv() {
            Ok(v) => v,
            Err(e) => {
                error!("{}", e);
                break;
            },
        };

        if *req.method() != Method::Post {
            debug!("refusing {} {}", req.method(), req.url());
            exec_status(req, 405);
            continue;
        }

        let content_type = req.headers()
            .iter()
            .find(|h| h.field.equiv("Content-Type"))
            .map(|h| h.value.as_str().to_string());
        debug!("processing request {} type {:?}", req.url(), &content_type);

        let reply = process_soap(&mut svc, content_type.as_deref(), req.as_reader());
        exec_response(req, reply);
    }
}
