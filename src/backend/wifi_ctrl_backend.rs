//! wifi-ctrl backend implementation

use tokio::process::Command;
use tracing::{debug, error, info};
use wifi_ctrl::sta::{RequestClient, WifiSetup};

use crate::{
    backend::NetworkStack,
    core::{
        error::{ApplyError, NetworkError, NetworkResult},
        types::{ConnectivityStatus, Credentials},
    },
};

/// Network stack driving wpa_supplicant through its control socket
pub struct WifiCtrlBackend {
    interface: String,
    client: RequestClient,
}

impl WifiCtrlBackend {
    pub async fn new(interface: String) -> NetworkResult<Self> {
        let path = format!("/var/run/wpa_supplicant/{}", interface);
        if !std::path::Path::new(&path).exists() {
            return Err(NetworkError::WpaSupplicant(format!(
                "control socket not found: {}",
                path
            )));
        }

        let mut setup =
            WifiSetup::new().map_err(|e| NetworkError::WpaSupplicant(e.to_string()))?;
        setup.set_socket_path(path);

        let client = setup.get_request_client();
        let station = setup.complete();

        // Spawn the station runtime
        tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("WifiStation runtime error: {}", e);
            }
        });

        info!("wpa_supplicant backend ready on {}", interface);
        Ok(Self { interface, client })
    }

    /// Map `wpa_state`/`ssid` from a STATUS reply to connectivity
    fn connectivity_from_status(
        wpa_state: Option<&str>,
        ssid: Option<&str>,
        ip_address: Option<String>,
    ) -> ConnectivityStatus {
        match wpa_state.unwrap_or("UNKNOWN") {
            "COMPLETED" => match ssid {
                Some(name) => ConnectivityStatus::Associated {
                    network_name: name.to_string(),
                    ip_address,
                },
                None => ConnectivityStatus::Associating { network_name: None },
            },
            "ASSOCIATING" | "ASSOCIATED" | "AUTHENTICATING" | "4WAY_HANDSHAKE"
            | "GROUP_HANDSHAKE" | "SCANNING" => ConnectivityStatus::Associating {
                network_name: ssid.map(str::to_string),
            },
            _ => ConnectivityStatus::Disconnected,
        }
    }

    /// Get IP address using ip command
    async fn get_ip_address(&self) -> Option<String> {
        let output = Command::new("ip")
            .args(["-4", "addr", "show", &self.interface])
            .output()
            .await
            .ok()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_ipv4(&stdout)
    }

    fn parse_ipv4(ip_output: &str) -> Option<String> {
        ip_output
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("inet "))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|cidr| cidr.split('/').next())
            .map(str::to_string)
    }

    async fn request(&self, command: String) -> Result<String, ApplyError> {
        self.client
            .send_custom(command.clone())
            .await
            .map_err(|e| ApplyError::Rejected(format!("{}: {}", command, e)))
    }
}

impl NetworkStack for WifiCtrlBackend {
    async fn activate(&self, credentials: &Credentials) -> Result<(), ApplyError> {
        debug!(
            network = credentials.network_name(),
            secret = %credentials.secret().fingerprint(),
            "Activating network"
        );

        // Replace whatever is configured so repeated activations converge on
        // the same single-network state
        self.request("REMOVE_NETWORK all".to_string()).await?;

        let network_id = self
            .client
            .add_network()
            .await
            .map_err(|e| ApplyError::Unavailable(format!("Failed to add network: {}", e)))?;

        // wifi-ctrl handles quoting internally via conf_escape
        self.client
            .set_network_ssid(network_id, credentials.network_name().to_string())
            .await
            .map_err(|e| ApplyError::Rejected(format!("Failed to set SSID: {}", e)))?;

        if credentials.is_open() {
            self.request(format!("SET_NETWORK {} key_mgmt NONE", network_id))
                .await?;
        } else {
            self.client
                .set_network_psk(network_id, credentials.secret().expose().to_string())
                .await
                .map_err(|e| ApplyError::Rejected(format!("Failed to set PSK: {}", e)))?;
        }

        // Select network (enables it and selects it)
        self.client
            .select_network(network_id)
            .await
            .map_err(|e| ApplyError::Rejected(format!("Failed to select network: {}", e)))?;

        debug!("Network activation requested");
        Ok(())
    }

    async fn query_connectivity(&self, network_name: &str) -> NetworkResult<ConnectivityStatus> {
        let status = self
            .client
            .get_status()
            .await
            .map_err(|e| NetworkError::QueryFailed(e.to_string()))?;

        let wpa_state = status.get("wpa_state").map(|s| s.as_str());
        let ssid = status.get("ssid").map(|s| s.as_str());

        let ip_address = match status.get("ip_address") {
            Some(ip) => Some(ip.clone()),
            None if wpa_state == Some("COMPLETED") => self.get_ip_address().await,
            None => None,
        };

        let connectivity = Self::connectivity_from_status(wpa_state, ssid, ip_address);
        debug!(network_name, ?connectivity, "Connectivity queried");
        Ok(connectivity)
    }

    async fn rollback(&self, previous: &Credentials) -> NetworkResult<()> {
        info!(network = previous.network_name(), "Rolling back network");
        self.activate(previous).await?;
        Ok(())
    }
}
