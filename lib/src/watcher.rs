use std::thread;

use tokio::sync::mpsc::{Receiver, channel};
use x11rb::connection::Connection;

use crate::backend::BackendEvent;
use crate::errors::*;
use crate::x11::{classify, connect};

make_log_macro!(debug, "watcher");
make_log_macro!(warn, "watcher");

/// Forward RandR change notifications from a dedicated connection.
///
/// The reader thread exits once the receiver is dropped and the next event
/// arrives, or when the connection fails.
pub fn watch_changes(display: Option<&str>) -> Result<Receiver<BackendEvent>> {
    let (conn, _root) = connect(display)?;
    let (tx, rx) = channel(16);

    thread::Builder::new()
        .name("randr-watcher".into())
        .spawn(move || {
            loop {
                let event = match conn.wait_for_event() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("display connection lost: {}", e);
                        return;
                    }
                };
                if let Some(event) = classify(&event) {
                    debug!("{:?}", event);
                    if tx.blocking_send(event).is_err() {
                        return;
                    }
                }
            }
        })
        .error("failed to start the RandR watcher")?;

    Ok(rx)
}
