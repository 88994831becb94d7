use tokio::sync::mpsc;

/// One side of a physical connection carrying encoded frames.
///
/// The websocket route pumps a socket into a `LinkEnd`; in-process clients
/// use [`memory_link`]. Dropping either half closes the connection.
#[derive(Debug)]
pub struct LinkEnd {
    pub tx: mpsc::UnboundedSender<String>,
    pub rx: mpsc::UnboundedReceiver<String>,
}

impl LinkEnd {
    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Two connected ends: what one sends, the other receives.
pub fn memory_link() -> (LinkEnd, LinkEnd) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        LinkEnd { tx: a_tx, rx: a_rx },
        LinkEnd { tx: b_tx, rx: b_rx },
    )
}
