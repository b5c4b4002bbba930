//! Best-effort systemd readiness notification (`sd_notify(3)`), implemented
//! directly over a Unix datagram socket so we don't pull in a dependency for
//! three lines of protocol. A no-op wherever `NOTIFY_SOCKET` isn't set,
//! which covers every non-Linux target and any run outside systemd.

#[cfg(unix)]
pub fn notify(state: &str) {
    use std::os::unix::net::UnixDatagram;

    let Ok(path) = std::env::var("NOTIFY_SOCKET") else {
        return;
    };
    let Ok(socket) = UnixDatagram::unbound() else {
        return;
    };
    let target = if let Some(rest) = path.strip_prefix('@') {
        format!("\0{rest}")
    } else {
        path
    };
    if let Err(e) = socket.send_to(state.as_bytes(), target) {
        tracing::debug!(error = %e, "sd_notify send failed, ignoring");
    }
}

#[cfg(not(unix))]
pub fn notify(_state: &str) {}

pub fn ready() {
    notify("READY=1");
}

pub fn stopping() {
    notify("STOPPING=1");
}

pub fn status(msg: &str) {
    notify(&format!("STATUS={msg}"));
}
