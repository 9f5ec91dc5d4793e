//! MirrorTty: the keystroke tap between the user's terminal and the shell.
//!
//! The renderer writes straight to stdout, but keystrokes must be seen by
//! the suggestion arbiter before the shell does — that is how a TAB can be
//! consumed instead of forwarded. MirrorTty owns the raw stdin reader and
//! delivers every byte block it reads onto a channel; while the completions
//! overlay is modal, blocks are diverted to the overlay's channel instead.

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::terminal::StdinReader;
use wisp_core::Result;

/// Where keystrokes are currently routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputRoute {
    /// To the suggestion state machine and on to the shell.
    #[default]
    Shell,
    /// To the modal completions overlay.
    Overlay,
}

/// Handle to the stdin pump.
pub struct MirrorTty {
    route: watch::Sender<InputRoute>,
}

/// Receiving ends of the keystroke channels.
pub struct KeystrokeStreams {
    /// Blocks bound for the state machine's stdin handler.
    pub shell: mpsc::Receiver<Vec<u8>>,
    /// Blocks bound for the modal overlay.
    pub overlay: mpsc::Receiver<Vec<u8>>,
}

impl MirrorTty {
    /// Start the pump task reading the user's stdin.
    ///
    /// The channels close when stdin reaches EOF.
    pub fn spawn() -> Result<(Self, KeystrokeStreams)> {
        let reader = StdinReader::new()?;
        let (route_tx, route_rx) = watch::channel(InputRoute::Shell);
        // Unbuffered in spirit: a block is in flight until consumed.
        let (shell_tx, shell_rx) = mpsc::channel::<Vec<u8>>(1);
        let (overlay_tx, overlay_rx) = mpsc::channel::<Vec<u8>>(1);

        tokio::spawn(pump(reader, route_rx, shell_tx, overlay_tx));

        Ok((
            Self { route: route_tx },
            KeystrokeStreams {
                shell: shell_rx,
                overlay: overlay_rx,
            },
        ))
    }

    /// Divert (or restore) the keystroke stream.
    pub fn set_route(&self, route: InputRoute) {
        let _ = self.route.send(route);
    }
}

async fn pump(
    mut reader: StdinReader,
    route: watch::Receiver<InputRoute>,
    shell_tx: mpsc::Sender<Vec<u8>>,
    overlay_tx: mpsc::Sender<Vec<u8>>,
) {
    while let Some(block) = reader.read().await {
        let target = *route.borrow();
        let delivered = match target {
            InputRoute::Shell => shell_tx.send(block).await,
            InputRoute::Overlay => overlay_tx.send(block).await,
        };
        if delivered.is_err() {
            debug!(?target, "keystroke channel closed, stopping pump");
            return;
        }
    }
    // EOF on the user's stdin: stop soliciting input. The wrapper keeps
    // running until the shell exits.
    debug!("stdin pump finished");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // The pump itself needs a real stdin; route plumbing is testable alone.

    #[test]
    fn route_defaults_to_shell() {
        let (route_tx, route_rx) = watch::channel(InputRoute::default());
        assert_eq!(*route_rx.borrow(), InputRoute::Shell);
        route_tx.send(InputRoute::Overlay).unwrap();
        assert_eq!(*route_rx.borrow(), InputRoute::Overlay);
    }
}
