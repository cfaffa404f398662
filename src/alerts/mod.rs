//! Alerts Module - Event-Stream vom Fraud-Detection-Service
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Service:
//! - Persistente Verbindung aufbauen und bei Abbruch neu aufbauen
//! - Eingehende Nachrichten parsen und an Abonnenten verteilen
//! - Optionale Benachrichtigungen an den Service senden
//!

mod channel;
mod messages;
mod transport;

pub use channel::{
    AlertChannel, AlertChannelError, ChannelEvent, ConnectionStatus, EventSubscription,
    DEFAULT_RECONNECT_DELAY,
};
pub use messages::*;
pub use transport::{
    Connection, Connector, Inbound, LoopbackConnector, LoopbackPeer, Outbound, TransportError,
    WebSocketConnector,
};
