use std::path::PathBuf;

use clap::{
    App,
    Arg,
    ArgMatches,
};

pub struct Settings {
    pub host: String,
    pub port: u16,
    pub config: PathBuf,
}

const BIND_HOST: &str = "0.0.0.0";
// the port cards upload to
const BIND_PORT: u16 = 59278;
const CONFIG_PATH: &str = "/etc/eyefid.toml";

impl Settings {

    pub fn new() -> Settings {
        Settings {
            host: BIND_HOST.to_string(),
            port: BIND_PORT,
            config: PathBuf::from(CONFIG_PATH),
        }
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) -> Result<(), String> {
        if let Some(v) = arg.value_of("host") {
            self.host = v.to_string();
        }

        if let Some(v) = arg.value_of("port") {
            self.port = v.parse().map_err(|e| format!("bad port '{}': {}", v, e))?;
        }

        if let Some(v) = arg.value_of("config") {
            self.config = PathBuf::from(v);
        }
        Ok(())
    }

    fn app<'a, 'b>() -> App<'a, 'b> {
        let mut o = App::new("eyefid");
        o = o.version(env!("CARGO_PKG_VERSION"));
        o = o.about("Receives photos from Eye-Fi cards");
        o = o.arg(
            Arg::with_name("host")
                .long("host")
                .short("H")
                .value_name("Host or ip to bind server to.")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .value_name("Port to bind server to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("Card configuration file")
                .takes_value(true)
                );
        o
    }

    pub fn from_args() -> Result<Settings, String> {
        let arg_matches = Settings::app().get_matches();
        let mut settings = Settings::new();
        settings.bind_from_args(&arg_matches)?;
        Ok(settings)
    }
}
