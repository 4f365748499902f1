//! External commands run on protocol events.
//!
//! A card may configure a shell command for each event. The command gets the
//! event data in its environment and runs detached from the server: nobody
//! waits for it and its outcome does not affect the response to the card.
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{
    Command,
    Stdio,
};
use std::thread;

use log::{debug, error, info};

use crate::config::CardConfig;

pub type HookEnv = Vec<(&'static str, String)>;

/// Starts an external task without waiting for it.
pub trait Launcher {
    fn launch(&self, command: &str, env: &HookEnv);
}

/// Runs commands with `/bin/sh -c` in their own process group, with the
/// standard streams on the null device.
///
/// The child is not a new session leader: it leaves the server's process
/// group, so job control signals aimed at the server miss it, but it keeps
/// the server's controlling terminal if there is one.
pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn launch(&self, command: &str, env: &HookEnv) {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                debug!("hook '{}' running as {}", command, pid);
                // reap the child off the request path
                thread::spawn(move || {
                    match child.wait() {
                        Ok(v) => debug!("hook {} exited with {}", pid, v),
                        Err(e) => debug!("hook {} lost: {}", pid, e),
                    }
                });
            },
            Err(e) => {
                error!("failed to execute '{}': {}", command, e);
            },
        }
    }
}

pub enum HookEvent<'a> {
    SessionStart {
        mac: &'a str,
        transfermode: i32,
        transfermodetimestamp: i64,
    },
    LastPhotoInRoll {
        mac: &'a str,
        mergedelta: i32,
    },
    UploadComplete {
        mac: &'a str,
        original: &'a str,
        uploaded: &'a Path,
        log: Option<&'a Path>,
    },
}

impl<'a> HookEvent<'a> {
    fn command<'c>(&self, card: &'c CardConfig) -> Option<&'c str> {
        let cmd = match self {
            HookEvent::SessionStart{..} => &card.on_start_session,
            HookEvent::LastPhotoInRoll{..} => &card.on_mark_last_photo_in_roll,
            HookEvent::UploadComplete{..} => &card.on_upload_photo,
        };
        cmd.as_deref().filter(|v| !v.trim().is_empty())
    }

    pub fn env(&self) -> HookEnv {
        match self {
            HookEvent::SessionStart{mac, transfermode, transfermodetimestamp} => vec!(
                ("EYEFI_MACADDRESS", mac.to_string()),
                ("EYEFI_TRANSFERMODE", transfermode.to_string()),
                ("EYEFI_TRANSFERMODETIMESTAMP", transfermodetimestamp.to_string()),
            ),
            HookEvent::LastPhotoInRoll{mac, mergedelta} => vec!(
                ("EYEFI_MACADDRESS", mac.to_string()),
                ("EYEFI_MERGEDELTA", mergedelta.to_string()),
            ),
            HookEvent::UploadComplete{mac, original, uploaded, log} => {
                let mut env = vec!(
                    ("EYEFI_UPLOADED_ORIG", original.to_string()),
                    ("EYEFI_MACADDRESS", mac.to_string()),
                    ("EYEFI_UPLOADED", uploaded.to_string_lossy().into_owned()),
                );
                if let Some(l) = log {
                    env.push(("EYEFI_LOG", l.to_string_lossy().into_owned()));
                }
                env
            },
        }
    }
}

/// Fire the card's command for `event`, if it has one.
pub fn dispatch(launcher: &dyn Launcher, card: &CardConfig, event: &HookEvent) {
    if let Some(cmd) = event.command(card) {
        info!("running hook '{}'", cmd);
        launcher.launch(cmd, &event.env());
    }
}
