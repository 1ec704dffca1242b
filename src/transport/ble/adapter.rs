//! BLE adapter management and the BlueZ link stack

use bluer::{
    Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty,
    adv::{Advertisement, AdvertisementHandle, Type},
    gatt::local::ApplicationHandle,
};
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use tokio::{
    sync::{Mutex, mpsc},
    task::AbortHandle,
};
use tracing::{debug, info, warn};

use crate::{
    core::{
        error::{LinkError, LinkResult},
        types::{PeerId, PeerMetadata},
    },
    transport::{
        ble::{gatt::GattServer, session::BleSessions, uuids::PROVISIONING_SERVICE_UUID},
        link_stack::{LinkEvent, LinkStack},
    },
};

/// Registrations that stay active while held
struct DiscoveryHandles {
    _application: ApplicationHandle,
    _advertisement: AdvertisementHandle,
}

/// Link stack backed by BlueZ
///
/// Peers are identified by their Bluetooth address. Request frames are
/// staged for the peer to read from the request characteristic and
/// responses arrive as (possibly long) writes to the response
/// characteristic.
pub struct BleLinkStack {
    _session: bluer::Session,
    adapter: Adapter,
    sessions: BleSessions,
    device_name: String,
    discovery: Mutex<Option<DiscoveryHandles>>,
}

impl BleLinkStack {
    /// Connect to BlueZ and pick the default adapter
    pub async fn new(device_name: String) -> LinkResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| LinkError::Unavailable(e.to_string()))?;
        let adapter = session.default_adapter().await.map_err(|e| {
            warn!("No default Bluetooth adapter: {}", e);
            LinkError::AdapterMissing
        })?;

        info!("Using BLE adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            sessions: BleSessions::new(),
            device_name,
            discovery: Mutex::new(None),
        })
    }

    fn address(peer_id: &PeerId) -> LinkResult<Address> {
        peer_id
            .as_str()
            .parse()
            .map_err(|_| LinkError::UnknownPeer(peer_id.clone()))
    }
}

fn bluez_error(e: bluer::Error) -> LinkError {
    LinkError::Unavailable(e.to_string())
}

async fn device_name(device: &Device) -> Option<String> {
    match device.name().await {
        Ok(Some(name)) if !name.is_empty() => Some(name),
        _ => device.alias().await.ok().filter(|alias| !alias.is_empty()),
    }
}

async fn link_up(device: &Device, sessions: &BleSessions, tx: &mpsc::UnboundedSender<LinkEvent>) {
    let address = device.address();
    if !sessions.open(address).await {
        return;
    }
    let display_name = device_name(device).await;
    info!("Peer connected: {} ({:?})", address, display_name);
    let _ = tx.send(LinkEvent::Connected {
        peer_id: PeerId::new(address.to_string()),
        display_name,
    });
}

async fn link_down(address: Address, sessions: &BleSessions, tx: &mpsc::UnboundedSender<LinkEvent>) {
    if !sessions.close(address).await {
        return;
    }
    info!("Peer disconnected: {}", address);
    let _ = tx.send(LinkEvent::Disconnected {
        peer_id: PeerId::new(address.to_string()),
    });
}

/// Follow the connection state of one device
async fn watch_device(
    device: Device,
    sessions: BleSessions,
    tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let address = device.address();
    let mut events = match device.events().await {
        Ok(events) => Box::pin(events),
        Err(e) => {
            warn!("Cannot watch device {}: {}", address, e);
            return;
        }
    };

    if device.is_connected().await.unwrap_or(false) {
        link_up(&device, &sessions, &tx).await;
    }

    while let Some(event) = events.next().await {
        let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = event else {
            continue;
        };
        if connected {
            link_up(&device, &sessions, &tx).await;
        } else {
            link_down(address, &sessions, &tx).await;
        }
    }
    debug!("Event stream of device {} ended", address);
}

impl LinkStack for BleLinkStack {
    async fn enable_discovery(&self) -> LinkResult<()> {
        info!("Starting BLE adapter");

        self.adapter.set_powered(true).await.map_err(bluez_error)?;
        self.adapter
            .set_alias(self.device_name.clone())
            .await
            .map_err(bluez_error)?;
        self.adapter
            .set_discoverable_timeout(0)
            .await
            .map_err(bluez_error)?;
        self.adapter
            .set_discoverable(true)
            .await
            .map_err(bluez_error)?;
        self.adapter.set_pairable(true).await.map_err(bluez_error)?;

        let application = GattServer::new(self.sessions.clone())
            .register(&self.adapter)
            .await
            .map_err(bluez_error)?;

        let advertisement = Advertisement {
            advertisement_type: Type::Peripheral,
            service_uuids: BTreeSet::from([PROVISIONING_SERVICE_UUID]),
            local_name: Some(self.device_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };
        let advertisement = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(bluez_error)?;

        *self.discovery.lock().await = Some(DiscoveryHandles {
            _application: application,
            _advertisement: advertisement,
        });

        info!(
            "BLE adapter started and discoverable as '{}'",
            self.device_name
        );
        Ok(())
    }

    async fn subscribe(&self) -> LinkResult<mpsc::UnboundedReceiver<LinkEvent>> {
        let mut events = Box::pin(self.adapter.events().await.map_err(bluez_error)?);
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            let mut watchers: HashMap<Address, AbortHandle> = HashMap::new();
            info!("BLE event loop started");

            while let Some(event) = events.next().await {
                match event {
                    AdapterEvent::DeviceAdded(address) => {
                        debug!("Device added: {}", address);
                        if watchers.get(&address).is_some_and(|w| !w.is_finished()) {
                            continue;
                        }
                        let device = match adapter.device(address) {
                            Ok(device) => device,
                            Err(e) => {
                                warn!("Cannot open device {}: {}", address, e);
                                continue;
                            }
                        };
                        let task = tokio::spawn(watch_device(device, sessions.clone(), tx.clone()));
                        watchers.insert(address, task.abort_handle());
                    }
                    AdapterEvent::DeviceRemoved(address) => {
                        debug!("Device removed: {}", address);
                        if let Some(watcher) = watchers.remove(&address) {
                            watcher.abort();
                        }
                        link_down(address, &sessions, &tx).await;
                    }
                    AdapterEvent::PropertyChanged(_) => {}
                }
            }

            warn!("BLE event loop ended");
            for watcher in watchers.into_values() {
                watcher.abort();
            }
        });

        Ok(rx)
    }

    async fn peer_metadata(&self, peer_id: &PeerId) -> LinkResult<PeerMetadata> {
        let device = self
            .adapter
            .device(Self::address(peer_id)?)
            .map_err(|_| LinkError::UnknownPeer(peer_id.clone()))?;
        let display_name = device_name(&device).await.unwrap_or_default();
        Ok(PeerMetadata { display_name })
    }

    async fn send(&self, peer_id: &PeerId, frame: Vec<u8>) -> LinkResult<()> {
        let address = Self::address(peer_id)?;
        let picked_up = self
            .sessions
            .stage(address, frame)
            .await
            .ok_or_else(|| LinkError::SendFailed(format!("{peer_id} is not connected")))?;

        picked_up
            .await
            .map_err(|_| LinkError::SendFailed(format!("{peer_id} left before reading")))
    }

    async fn receive(&self, peer_id: &PeerId) -> LinkResult<Vec<u8>> {
        let address = Self::address(peer_id)?;
        let inbox = self
            .sessions
            .inbox(address)
            .await
            .ok_or_else(|| LinkError::ReceiveFailed(format!("{peer_id} is not connected")))?;

        let mut inbox = inbox.lock().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| LinkError::ReceiveFailed(format!("{peer_id} disconnected")))
    }
}
